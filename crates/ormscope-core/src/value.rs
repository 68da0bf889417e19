//! Dynamic SQL values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A dynamically-typed SQL value.
///
/// This enum is used for parameter binding, result fetching and for the
/// attribute dictionaries of mapped instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL name of the variant, for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Json(_) => "JSON",
        }
    }

    /// Truthiness of an integer or boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(v) = self {
            return Some(*v);
        }
        self.as_i64().map(|n| n != 0)
    }

    /// Integer view across widths. Booleans count as 0/1.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::Int(v) => i64::from(v),
            Value::BigInt(v) => v,
            Value::Bool(v) => i64::from(v),
            _ => return None,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            Value::Int(v) => Some(f64::from(v)),
            Value::BigInt(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::Text(s) = self { Some(s) } else { None }
    }

    /// Raw bytes of a blob, or the UTF-8 bytes of text.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Canonical form used for identity comparisons.
    ///
    /// Integers of every width collapse to `BigInt` so a key typed by the
    /// caller as `Int(7)` matches the `BigInt(7)` a driver hands back.
    #[must_use]
    pub fn normalized(&self) -> Value {
        match self {
            Value::Int(v) => Value::BigInt(i64::from(*v)),
            other => other.clone(),
        }
    }

    /// Feed this value into a hasher.
    ///
    /// `Value` is not `Eq` because of `Double`; hashing goes through the bit
    /// pattern instead so values can still key identity maps.
    pub fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        std::mem::discriminant(self).hash(hasher);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(hasher),
            Value::Int(i) => i.hash(hasher),
            Value::BigInt(i) => i.hash(hasher),
            Value::Double(f) => f.to_bits().hash(hasher),
            Value::Text(s) => s.hash(hasher),
            Value::Bytes(b) => b.hash(hasher),
            Value::Json(j) => j.to_string().hash(hasher),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "<{} byte blob>", b.len()),
            Value::Json(j) => fmt::Display::fmt(j, f),
            Value::Bool(b) => fmt::Display::fmt(b, f),
            Value::Int(n) => fmt::Display::fmt(n, f),
            Value::BigInt(n) => fmt::Display::fmt(n, f),
            Value::Double(n) => fmt::Display::fmt(n, f),
        }
    }
}

macro_rules! value_from {
    ($($src:ty => $variant:ident $(via $conv:path)?),* $(,)?) => {
        $(
            impl From<$src> for Value {
                fn from(v: $src) -> Self {
                    Value::$variant($($conv)?(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => BigInt,
    f64 => Double,
    String => Text,
    &str => Text via str::to_owned,
    Vec<u8> => Bytes,
    serde_json::Value => Json,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash_into(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn normalized_integers_hash_alike() {
        let a = Value::Int(7).normalized();
        let b = Value::BigInt(7).normalized();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn option_conversions() {
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some("ed")), Value::Text("ed".to_string()));
        assert_eq!(Value::from(Some(3_i64)).as_i64(), Some(3));
    }

    #[test]
    fn display_quotes_text() {
        assert_eq!(Value::from("y1").to_string(), "'y1'");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::from(vec![1_u8, 2]).to_string(), "<2 byte blob>");
    }

    #[test]
    fn distinct_variants_hash_apart() {
        assert_ne!(hash_of(&Value::Int(1)), hash_of(&Value::BigInt(1)));
        assert_ne!(hash_of(&Value::Null), hash_of(&Value::Bool(false)));
    }
}
