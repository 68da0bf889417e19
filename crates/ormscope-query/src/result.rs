//! Result rows addressable by original column, name or position.

use crate::compiler::ResultColumn;
use crate::schema::Column;
use ormscope_core::{
    ColumnInfo, Error, FromValue, Result, Row, SchemaError, SchemaErrorKind, Value,
};
use std::sync::Arc;

/// One row of a statement result.
///
/// Values have already been through each slot's result processing.
#[derive(Debug, Clone)]
pub struct ResultRow {
    values: Vec<Value>,
    map: Arc<[ResultColumn]>,
    columns: Arc<ColumnInfo>,
}

impl ResultRow {
    pub(crate) fn from_row(map: Arc<[ResultColumn]>, row: Row) -> Self {
        let columns = row.column_info();
        let values = row
            .into_values()
            .into_iter()
            .enumerate()
            .map(|(i, v)| match map.get(i).and_then(|slot| slot.type_.as_ref()) {
                Some(ty) => ty.process_result_value(v),
                None => v,
            })
            .collect();
        Self {
            values,
            map,
            columns,
        }
    }

    /// Value produced for `column`, whether it was selected directly,
    /// through a type's column expression, or under a label.
    pub fn column(&self, column: &Arc<Column>) -> Result<&Value> {
        self.map
            .iter()
            .position(|slot| slot.targets(column))
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| {
                Error::Schema(SchemaError {
                    kind: SchemaErrorKind::ColumnNotFound,
                    message: format!(
                        "Could not locate column in row for column '{}.{}'",
                        column.table_name(),
                        column.name()
                    ),
                    source: None,
                })
            })
    }

    /// Typed access by original column.
    pub fn column_as<T: FromValue>(&self, column: &Arc<Column>) -> Result<T> {
        T::from_value(self.column(column)?)
    }

    /// Value at a position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by result name (label, or column name without labels).
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.map
            .iter()
            .position(|slot| slot.name == name)
            .or_else(|| self.columns.index_of(name))
            .and_then(|i| self.values.get(i))
    }

    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            Error::Custom(format!(
                "index {} out of bounds (row has {} columns)",
                index,
                self.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Result names in position order.
    pub fn keys(&self) -> Vec<&str> {
        (0..self.values.len())
            .map(|i| match self.map.get(i) {
                Some(slot) => slot.name.as_str(),
                None => self.columns.name_at(i).unwrap_or_default(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn to_values(&self) -> Vec<Value> {
        self.values.clone()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// The row as a JSON object keyed by result name.
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .keys()
            .into_iter()
            .zip(&self.values)
            .map(|(k, v)| (k.to_string(), value_to_json(v)))
            .collect();
        serde_json::Value::Object(object)
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::BigInt(n) => serde_json::Value::from(*n),
        Value::Double(n) => serde_json::Value::from(*n),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::from(b.clone()),
        Value::Json(j) => j.clone(),
    }
}

/// The outcome of executing a statement.
#[derive(Debug, Clone)]
pub struct ResultSet {
    rows: Vec<ResultRow>,
    map: Arc<[ResultColumn]>,
    pub(crate) rowcount: u64,
    pub(crate) last_insert_id: Option<i64>,
}

impl ResultSet {
    pub(crate) fn new(map: Arc<[ResultColumn]>) -> Self {
        Self {
            rows: Vec::new(),
            map,
            rowcount: 0,
            last_insert_id: None,
        }
    }

    pub(crate) fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    pub(crate) fn shared_map(&self) -> Arc<[ResultColumn]> {
        Arc::clone(&self.map)
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }

    pub fn first(&self) -> Option<&ResultRow> {
        self.rows.first()
    }

    /// First column of the first row.
    pub fn scalar(&self) -> Option<&Value> {
        self.first().and_then(|r| r.get(0))
    }

    /// Every row as a plain value tuple.
    pub fn all_values(&self) -> Vec<Vec<Value>> {
        self.rows.iter().map(ResultRow::to_values).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows affected (or returned, for row-producing statements).
    pub fn rowcount(&self) -> u64 {
        self.rowcount
    }

    /// Row id assigned by a single-row INSERT.
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    pub fn result_map(&self) -> &[ResultColumn] {
        &self.map
    }
}

impl IntoIterator for ResultSet {
    type Item = ResultRow;
    type IntoIter = std::vec::IntoIter<ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
