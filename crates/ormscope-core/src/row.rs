//! Raw database rows as handed back by a driver.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Index a result header.
    ///
    /// When a name repeats, lookups by name resolve to its first position.
    pub fn new(names: Vec<String>) -> Self {
        let mut name_to_index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            name_to_index.entry(name.clone()).or_insert(i);
        }
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get the name of a column by index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
///
/// Rows from the same statement share their `ColumnInfo` through an `Arc`.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// A row with its own header. Drivers use [`Row::with_columns`].
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// A row sharing the header of the rest of its result set.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Typed value by position.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        match self.get(index) {
            Some(value) => T::from_value(value),
            None => Err(TypeError::new(
                std::any::type_name::<T>(),
                format!("index {index} of a {}-column row", self.len()),
            )
            .into()),
        }
    }

    /// Typed value by column name. Conversion errors name the column.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let Some(value) = self.get_by_name(name) else {
            return Err(TypeError::new(std::any::type_name::<T>(), "no such column")
                .in_column(name)
                .into());
        };
        T::from_value(value).map_err(|e| match e {
            Error::Type(te) => te.in_column(name).into(),
            e => e,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Consume the row, returning its values in column order.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(self.values.iter())
    }
}

/// Trait for converting from a `Value` to a typed value.
pub trait FromValue: Sized {
    /// Convert from a Value, returning an error if the conversion fails.
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    TypeError::new(expected, value.type_name()).into()
}

macro_rules! from_value_via {
    ($($ty:ty => $name:literal, |$v:ident| $conv:expr;)*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self> {
                    let $v = value;
                    $conv.ok_or_else(|| mismatch($name, value))
                }
            }
        )*
    };
}

from_value_via! {
    bool => "bool", |v| v.as_bool();
    i64 => "i64", |v| v.as_i64();
    f64 => "f64", |v| v.as_f64();
    String => "String", |v| v.as_str().map(str::to_owned);
    Vec<u8> => "Vec<u8>", |v| v.as_bytes().map(<[u8]>::to_vec);
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value).map_err(|_| mismatch("i32", value))?;
        i32::try_from(wide)
            .map_err(|_| TypeError::new("i32", format!("{wide} (out of range)")).into())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s)
                .map_err(|e| TypeError::new("JSON", format!("unparseable text ({e})")).into()),
            _ => Err(mismatch("JSON", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string(), "nick".to_string()],
            vec![
                Value::BigInt(7),
                Value::Text("jack".to_string()),
                Value::Null,
            ],
        )
    }

    #[test]
    fn positional_and_named_lookup() {
        let row = sample();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&Value::BigInt(7)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("jack".into())));
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(
            row.column_names().collect::<Vec<_>>(),
            vec!["id", "name", "nick"]
        );
    }

    #[test]
    fn typed_reads_widen_and_narrow() {
        let row = sample();
        assert_eq!(row.get_as::<i64>(0).unwrap(), 7);
        assert_eq!(row.get_as::<i32>(0).unwrap(), 7);
        assert_eq!(row.get_named::<String>("name").unwrap(), "jack");
        assert_eq!(row.get_named::<Option<String>>("nick").unwrap(), None);
    }

    #[test]
    fn type_errors_name_the_column() {
        let row = sample();
        let err = row.get_named::<i64>("name").unwrap_err();
        match err {
            Error::Type(te) => {
                assert_eq!(te.expected, "i64");
                assert_eq!(te.column.as_deref(), Some("name"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(row.get_as::<i64>(9).is_err());
    }

    #[test]
    fn json_from_text_and_range_checks() {
        let row = Row::new(
            vec!["doc".to_string(), "big".to_string()],
            vec![Value::from(r#"{"a":1}"#), Value::BigInt(i64::MAX)],
        );
        assert_eq!(
            row.get_named::<serde_json::Value>("doc").unwrap(),
            serde_json::json!({"a": 1})
        );
        assert!(row.get_named::<i32>("big").is_err());
        assert_eq!(row.get_named::<i64>("big").unwrap(), i64::MAX);
    }

    #[test]
    fn duplicate_names_resolve_to_first() {
        let row = Row::new(
            vec!["y".to_string(), "y".to_string()],
            vec![Value::from("a"), Value::from("b")],
        );
        assert_eq!(row.get_by_name("y"), Some(&Value::from("a")));
    }
}
