//! INSERT, UPDATE and DELETE statements.
//!
//! Column references in these statements render unqualified; values bound
//! to a column go through that column's bind expression.

use crate::compiler::{Compiled, Labels, SqlCompiler, StatementKind};
use crate::expr::{BindParam, Expr};
use crate::params::Params;
use crate::schema::{Column, Table};
use ormscope_core::{CompileErrorKind, Dialect, Error, Result};
use std::sync::Arc;

/// Render the value for one column: an untyped bind or literal becomes a
/// named bind carrying the column's type.
fn column_value(c: &mut SqlCompiler, column: &Arc<Column>, value: Option<&Expr>) -> String {
    let typed = |bind: BindParam| bind.with_type(Arc::clone(column.type_engine()));
    match value {
        None => c.bind(&typed(BindParam::new(column.key())), false),
        Some(Expr::Literal(v)) => {
            let bind = BindParam::new(column.key()).with_value(v.clone());
            c.bind(&typed(bind), false)
        }
        Some(Expr::BindParam(b)) if b.type_engine().is_none() => c.bind(&typed(b.clone()), false),
        Some(other) => c.expr(other, false),
    }
}

/// Resolve `(key, expr)` pairs plus bare parameter keys into table columns,
/// in table order.
fn target_columns<'a>(
    table: &Table,
    values: &'a [(String, Expr)],
    param_keys: Option<&Params>,
) -> Result<Vec<(Arc<Column>, Option<&'a Expr>)>> {
    for (key, _) in values {
        if !table.c().contains_key(key) {
            return Err(unknown_column(table, key));
        }
    }
    if let Some(params) = param_keys {
        if let Some(key) = params.keys().find(|k| !table.c().contains_key(k)) {
            return Err(unknown_column(table, key));
        }
    }
    Ok(table
        .columns()
        .iter()
        .filter_map(|col| {
            let explicit = values
                .iter()
                .find(|(k, _)| k == col.key())
                .map(|(_, e)| e);
            let from_params = param_keys.is_some_and(|p| p.contains_key(col.key()));
            (explicit.is_some() || from_params).then(|| (Arc::clone(col), explicit))
        })
        .collect())
}

fn unknown_column(table: &Table, key: &str) -> Error {
    Error::compile(
        CompileErrorKind::UnknownColumn,
        format!("Unconsumed column name: table '{}' has no column '{}'", table.name(), key),
    )
}

/// An INSERT statement.
#[derive(Debug, Clone)]
pub struct Insert {
    table: Table,
    values: Vec<(String, Expr)>,
    returning: Vec<Expr>,
}

impl Insert {
    pub fn new(table: &Table) -> Self {
        Self {
            table: table.clone(),
            values: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Set one column value. Literals become bind parameters named after
    /// the column key.
    pub fn value(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.values.push((key, value)),
        }
        self
    }

    /// Set several column values.
    pub fn values<K: Into<String>, V: Into<Expr>>(
        self,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        values
            .into_iter()
            .fold(self, |stmt, (k, v)| stmt.value(k, v))
    }

    /// Add RETURNING columns or expressions.
    pub fn returning<E: Into<Expr>>(mut self, exprs: impl IntoIterator<Item = E>) -> Self {
        self.returning.extend(exprs.into_iter().map(Into::into));
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn has_returning(&self) -> bool {
        !self.returning.is_empty()
    }

    /// Compile with every column of the table (or only the `.values()`
    /// columns when some were given).
    pub fn compile(&self, dialect: Dialect) -> Result<Compiled> {
        self.compile_with(dialect, None)
    }

    /// Compile for a parameter set: its keys join the `.values()` columns.
    /// Without either, every table column is listed; an empty set with no
    /// `.values()` renders `DEFAULT VALUES`.
    #[tracing::instrument(level = "trace", skip(self, params))]
    pub fn compile_with(&self, dialect: Dialect, params: Option<&Params>) -> Result<Compiled> {
        let targets = if self.values.is_empty() && params.is_none() {
            self.table
                .columns()
                .iter()
                .map(|col| (Arc::clone(col), None))
                .collect()
        } else {
            target_columns(&self.table, &self.values, params)?
        };

        let mut c = SqlCompiler::new(dialect);
        let mut sql = format!("INSERT INTO {}", c.ident(self.table.name()));
        if targets.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let names: Vec<String> = targets.iter().map(|(col, _)| c.ident(col.name())).collect();
            let values: Vec<String> = targets
                .iter()
                .map(|(col, value)| column_value(&mut c, col, *value))
                .collect();
            sql.push_str(&format!(" ({}) VALUES ({})", names.join(", "), values.join(", ")));
        }
        if !self.returning.is_empty() {
            let cols: Vec<String> = self
                .returning
                .iter()
                .map(|e| c.result_element(e, Labels::Anonymous, false))
                .collect();
            sql.push_str(" RETURNING ");
            sql.push_str(&cols.join(", "));
        }
        let returns_rows = !self.returning.is_empty();
        Ok(c.finish(sql, StatementKind::Insert, returns_rows))
    }
}

/// An UPDATE statement.
#[derive(Debug, Clone)]
pub struct Update {
    table: Table,
    values: Vec<(String, Expr)>,
    where_clause: Option<Expr>,
}

impl Update {
    pub fn new(table: &Table) -> Self {
        Self {
            table: table.clone(),
            values: Vec::new(),
            where_clause: None,
        }
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.values.push((key, value)),
        }
        self
    }

    pub fn values<K: Into<String>, V: Into<Expr>>(
        self,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        values
            .into_iter()
            .fold(self, |stmt, (k, v)| stmt.value(k, v))
    }

    pub fn where_(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn compile(&self, dialect: Dialect) -> Result<Compiled> {
        self.compile_with(dialect, None)
    }

    /// Compile for a parameter set. Keys of the set that name columns
    /// become SET targets; the rest are left for the WHERE clause.
    #[tracing::instrument(level = "trace", skip(self, params))]
    pub fn compile_with(&self, dialect: Dialect, params: Option<&Params>) -> Result<Compiled> {
        let set_params: Option<Params> = params.map(|p| {
            p.iter()
                .filter(|(k, _)| self.table.c().contains_key(k))
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        });
        let targets = target_columns(&self.table, &self.values, set_params.as_ref())?;
        if targets.is_empty() {
            return Err(Error::compile(
                CompileErrorKind::Unsupported,
                format!("UPDATE of '{}' has no SET columns", self.table.name()),
            ));
        }

        let mut c = SqlCompiler::new(dialect);
        let assignments: Vec<String> = targets
            .iter()
            .map(|(col, value)| {
                let v = column_value(&mut c, col, *value);
                format!("{}={}", c.ident(col.name()), v)
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            c.ident(self.table.name()),
            assignments.join(", ")
        );
        if let Some(w) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&c.expr(w, false));
        }
        Ok(c.finish(sql, StatementKind::Update, false))
    }
}

/// A DELETE statement.
#[derive(Debug, Clone)]
pub struct Delete {
    table: Table,
    where_clause: Option<Expr>,
}

impl Delete {
    pub fn new(table: &Table) -> Self {
        Self {
            table: table.clone(),
            where_clause: None,
        }
    }

    pub fn where_(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn compile(&self, dialect: Dialect) -> Compiled {
        let mut c = SqlCompiler::new(dialect);
        let mut sql = format!("DELETE FROM {}", c.ident(self.table.name()));
        if let Some(w) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&c.expr(w, false));
        }
        c.finish(sql, StatementKind::Delete, false)
    }
}

impl Table {
    /// Start an INSERT into this table.
    pub fn insert(&self) -> Insert {
        Insert::new(self)
    }

    /// Start an UPDATE of this table.
    pub fn update(&self) -> Update {
        Update::new(self)
    }

    /// Start a DELETE from this table.
    pub fn delete(&self) -> Delete {
        Delete::new(self)
    }
}
