//! Column type engines.
//!
//! A [`TypeEngine`] describes how a column is declared and, optionally, how
//! values are coerced on their way in and out of the database. Coercion
//! happens at two levels:
//!
//! - SQL level: [`TypeEngine::bind_expression`] wraps every bound parameter
//!   destined for the column, and [`TypeEngine::column_expression`] wraps
//!   every reference to the column in a SELECT list or RETURNING clause.
//! - Value level: [`TypeEngine::process_bind_value`] and
//!   [`TypeEngine::process_result_value`] run in Rust before binding and
//!   after fetching.
//!
//! [`TypeDecorator`] builds a new type out of an existing implementation type
//! plus a [`Decorator`]; both routes compose the same way in the compiler.

use crate::expr::Expr;
use ormscope_core::{SqlType, Value};
use std::fmt;
use std::sync::Arc;

/// Behaviour attached to a column type.
pub trait TypeEngine: fmt::Debug + Send + Sync {
    /// The type used in DDL.
    fn sql_type(&self) -> SqlType;

    /// Wrap a bound parameter in SQL, e.g. `lower(:y)`.
    ///
    /// Returning `None` leaves the parameter as a plain placeholder.
    fn bind_expression(&self, _bind: Expr) -> Option<Expr> {
        None
    }

    /// Wrap a column reference in a SELECT list or RETURNING clause.
    fn column_expression(&self, _column: Expr) -> Option<Expr> {
        None
    }

    /// Convert a parameter value before it is handed to the driver.
    fn process_bind_value(&self, value: Value) -> Value {
        value
    }

    /// Convert a fetched value before it reaches the caller.
    fn process_result_value(&self, value: Value) -> Value {
        value
    }
}

/// Shared handle to a type engine.
pub type TypeRef = Arc<dyn TypeEngine>;

/// `INTEGER`
#[derive(Debug, Clone, Copy, Default)]
pub struct Integer;

impl TypeEngine for Integer {
    fn sql_type(&self) -> SqlType {
        SqlType::Integer
    }

    fn process_result_value(&self, value: Value) -> Value {
        value.normalized()
    }
}

/// `VARCHAR(n)`, or `TEXT` when no length is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringType {
    pub length: Option<u32>,
}

impl StringType {
    pub const fn new() -> Self {
        Self { length: None }
    }

    pub const fn with_length(length: u32) -> Self {
        Self {
            length: Some(length),
        }
    }
}

impl TypeEngine for StringType {
    fn sql_type(&self) -> SqlType {
        match self.length {
            Some(len) => SqlType::VarChar(len),
            None => SqlType::Text,
        }
    }
}

/// `DOUBLE PRECISION`
#[derive(Debug, Clone, Copy, Default)]
pub struct Float;

impl TypeEngine for Float {
    fn sql_type(&self) -> SqlType {
        SqlType::Double
    }

    fn process_result_value(&self, value: Value) -> Value {
        match value {
            Value::Int(_) | Value::BigInt(_) => value.as_f64().map_or(value, Value::Double),
            other => other,
        }
    }
}

/// `BOOLEAN`
///
/// SQLite stores booleans as integers; results are turned back into `Bool`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Boolean;

impl TypeEngine for Boolean {
    fn sql_type(&self) -> SqlType {
        SqlType::Boolean
    }

    fn process_result_value(&self, value: Value) -> Value {
        match value {
            Value::Int(_) | Value::BigInt(_) => value.as_bool().map_or(value, Value::Bool),
            other => other,
        }
    }
}

/// The customisable half of a [`TypeDecorator`].
///
/// Every hook defaults to "no opinion", in which case the implementation
/// type's own hook is used.
pub trait Decorator: fmt::Debug + Send + Sync {
    fn bind_expression(&self, _bind: Expr) -> Option<Expr> {
        None
    }

    fn column_expression(&self, _column: Expr) -> Option<Expr> {
        None
    }

    fn process_bind_param(&self, value: Value) -> Value {
        value
    }

    fn process_result_value(&self, value: Value) -> Value {
        value
    }
}

/// A type built from an implementation type plus a [`Decorator`].
#[derive(Debug)]
pub struct TypeDecorator<D> {
    decorator: D,
    impl_type: TypeRef,
}

impl<D: Decorator> TypeDecorator<D> {
    pub fn new(decorator: D, impl_type: impl TypeEngine + 'static) -> Self {
        Self {
            decorator,
            impl_type: Arc::new(impl_type),
        }
    }

    /// The wrapped implementation type.
    pub fn impl_type(&self) -> &TypeRef {
        &self.impl_type
    }

    pub fn decorator(&self) -> &D {
        &self.decorator
    }
}

impl<D: Decorator> TypeEngine for TypeDecorator<D> {
    fn sql_type(&self) -> SqlType {
        self.impl_type.sql_type()
    }

    fn bind_expression(&self, bind: Expr) -> Option<Expr> {
        self.decorator
            .bind_expression(bind.clone())
            .or_else(|| self.impl_type.bind_expression(bind))
    }

    fn column_expression(&self, column: Expr) -> Option<Expr> {
        self.decorator
            .column_expression(column.clone())
            .or_else(|| self.impl_type.column_expression(column))
    }

    fn process_bind_value(&self, value: Value) -> Value {
        let value = self.decorator.process_bind_param(value);
        self.impl_type.process_bind_value(value)
    }

    fn process_result_value(&self, value: Value) -> Value {
        let value = self.impl_type.process_result_value(value);
        self.decorator.process_result_value(value)
    }
}
