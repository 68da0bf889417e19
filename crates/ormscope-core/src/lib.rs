//! Core types and traits for ormscope.
//!
//! - `Value` and `Row` for data moving in and out of the database
//! - `Error`, the single error type shared by every crate
//! - `Dialect` and `SqlType` for SQL rendering
//! - `Connection` trait for database connections
//! - `Outcome` and `Cx` re-exported from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod dialect;
pub mod error;
pub mod row;
pub mod types;
pub mod value;

pub use connection::Connection;
pub use dialect::Dialect;
pub use error::{
    CompileError, CompileErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, Error,
    InspectionError, InspectionErrorKind, QueryError, QueryErrorKind, Result, SchemaError,
    SchemaErrorKind, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use value::Value;

/// Unwrap an `Outcome::Ok`, returning any other variant from the enclosing
/// function unchanged.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning `Outcome`.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return $crate::Outcome::Err(e),
        }
    };
}
