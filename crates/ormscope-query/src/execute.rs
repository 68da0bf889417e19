//! Statement execution over a [`Connection`].

use crate::compiler::{Compiled, StatementKind};
use crate::dml::{Delete, Insert, Update};
use crate::params::Params;
use crate::result::{ResultRow, ResultSet};
use crate::select::Select;
use asupersync::{Cx, Outcome};
use ormscope_core::{Connection, Dialect, Error, Result, try_outcome, try_result};

/// Literal SQL, executed as written.
///
/// Parameters are bound positionally in the order of the parameter set.
#[derive(Debug, Clone)]
pub struct TextClause {
    sql: String,
}

/// Wrap literal SQL as a statement.
pub fn text(sql: impl Into<String>) -> TextClause {
    TextClause { sql: sql.into() }
}

impl TextClause {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn returns_rows(&self) -> bool {
        let head = self
            .sql
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        matches!(head.as_str(), "select" | "with" | "pragma" | "values")
            || self.sql.to_ascii_lowercase().contains(" returning ")
    }
}

/// Any executable statement.
#[derive(Debug, Clone)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Text(TextClause),
}

impl Statement {
    /// Compile for a dialect, using the first parameter set to decide which
    /// columns INSERT and UPDATE statements target.
    pub fn compile_with(&self, dialect: Dialect, params: Option<&Params>) -> Result<Compiled> {
        match self {
            Statement::Select(s) => Ok(s.compile(dialect)),
            Statement::Insert(i) => i.compile_with(dialect, params),
            Statement::Update(u) => u.compile_with(dialect, params),
            Statement::Delete(d) => Ok(d.compile(dialect)),
            Statement::Text(t) => Ok(Compiled::text(t.sql.clone(), t.returns_rows(), dialect)),
        }
    }
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<Insert> for Statement {
    fn from(i: Insert) -> Self {
        Statement::Insert(i)
    }
}

impl From<Update> for Statement {
    fn from(u: Update) -> Self {
        Statement::Update(u)
    }
}

impl From<Delete> for Statement {
    fn from(d: Delete) -> Self {
        Statement::Delete(d)
    }
}

impl From<TextClause> for Statement {
    fn from(t: TextClause) -> Self {
        Statement::Text(t)
    }
}

/// Compile and run a statement.
///
/// With several parameter sets the statement runs once per set
/// ("executemany"); rowcounts are summed and returned rows concatenated.
/// A single INSERT without RETURNING reports the new row id.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn execute<C: Connection>(
    cx: &Cx,
    conn: &C,
    statement: impl Into<Statement>,
    params: &[Params],
) -> Outcome<ResultSet, Error> {
    let statement = statement.into();
    let compiled = try_result!(statement.compile_with(conn.dialect(), params.first()));
    execute_compiled(cx, conn, &compiled, params).await
}

/// Run an already compiled statement.
pub async fn execute_compiled<C: Connection>(
    cx: &Cx,
    conn: &C,
    compiled: &Compiled,
    params: &[Params],
) -> Outcome<ResultSet, Error> {
    let sets: Vec<Option<&Params>> = if params.is_empty() {
        vec![None]
    } else {
        params.iter().map(Some).collect()
    };
    tracing::debug!(sql = %compiled.sql(), sets = sets.len(), "Executing statement");

    let mut result = ResultSet::new(compiled.shared_result_map());
    for set in sets.iter().copied() {
        let values = try_result!(compiled.construct_params(set));
        tracing::trace!(params = ?values, "Bound parameters");

        if compiled.returns_rows() {
            let rows = try_outcome!(conn.query(cx, compiled.sql(), &values).await);
            result.rowcount += rows.len() as u64;
            for row in rows {
                result.push(ResultRow::from_row(result.shared_map(), row));
            }
        } else if compiled.kind() == StatementKind::Insert && sets.len() == 1 {
            let id = try_outcome!(conn.insert(cx, compiled.sql(), &values).await);
            result.rowcount += 1;
            result.last_insert_id = Some(id);
        } else {
            result.rowcount += try_outcome!(conn.execute(cx, compiled.sql(), &values).await);
        }
    }
    Outcome::Ok(result)
}
