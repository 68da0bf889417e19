//! Column storage types as written in DDL.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// The SQL type a column is declared with.
///
/// Type engines in `ormscope-query` report one of these; it only affects
/// `CREATE TABLE` output and integer primary-key autoincrement detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Boolean,
    VarChar(u32),
    Text,
    Blob,
    /// Rendered verbatim.
    Custom(String),
}

impl SqlType {
    pub fn sql_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::VarChar(len) => return Cow::Owned(format!("VARCHAR({len})")),
            SqlType::Custom(name) => name.as_str(),
        })
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::VarChar(_) | SqlType::Text)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(SqlType::VarChar(50).sql_name(), "VARCHAR(50)");
        assert_eq!(SqlType::Custom("CITEXT".into()).to_string(), "CITEXT");
        assert!(SqlType::BigInt.is_integer());
        assert!(!SqlType::Double.is_integer());
        assert!(SqlType::Text.is_text());
        assert!(!SqlType::Blob.is_text());
    }
}
