//! The driver seam.
//!
//! Compiled statements reach a database only through [`Connection`]. Every
//! call takes the asupersync `Cx` and resolves to an `Outcome`, so a driver
//! can honour cancellation the same way the rest of the runtime does.

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A database connection that runs SQL already rendered for its
/// [`dialect`](Connection::dialect).
///
/// ```rust,ignore
/// let rows = conn.query(&cx, "SELECT name FROM users WHERE id = ?1", &[Value::BigInt(1)]).await;
/// let id = conn.insert(&cx, "INSERT INTO users (name) VALUES (?1)", &[Value::from("ed")]).await;
/// ```
pub trait Connection: Send + Sync {
    /// Placeholder and quoting style statements must be compiled with.
    fn dialect(&self) -> Dialect;

    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Run a statement that returns no rows; resolves to the affected count.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Run an INSERT; resolves to the row id the database assigned.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Run statements in order, stopping at the first failure.
    fn batch(
        &self,
        cx: &Cx,
        statements: &[(String, Vec<Value>)],
    ) -> impl Future<Output = Outcome<Vec<u64>, Error>> + Send;

    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Release the underlying handle.
    fn close(self, cx: &Cx) -> impl Future<Output = Result<()>> + Send;
}
