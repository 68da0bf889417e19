//! SELECT statements.

use crate::compiler::{Compiled, Labels, SqlCompiler, StatementKind};
use crate::expr::{Expr, OrderBy};
use crate::schema::{Column, Table};
use ormscope_core::Dialect;
use std::sync::Arc;

/// Something that can appear in a SELECT list: a whole table (all of its
/// columns) or a single expression.
#[derive(Debug, Clone)]
pub enum Selectable {
    Table(Table),
    Expr(Expr),
}

impl From<&Table> for Selectable {
    fn from(table: &Table) -> Self {
        Selectable::Table(table.clone())
    }
}

impl From<Table> for Selectable {
    fn from(table: Table) -> Self {
        Selectable::Table(table)
    }
}

impl From<Expr> for Selectable {
    fn from(expr: Expr) -> Self {
        Selectable::Expr(expr)
    }
}

impl From<&Arc<Column>> for Selectable {
    fn from(column: &Arc<Column>) -> Self {
        Selectable::Expr(Expr::col(column))
    }
}

/// A SELECT statement.
#[derive(Debug, Clone, Default)]
pub struct Select {
    columns: Vec<Expr>,
    from: Vec<String>,
    where_clause: Option<Expr>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    use_labels: bool,
}

/// Create a SELECT over tables and/or expressions.
///
/// ```ignore
/// let stmt = select([&table]).where_(table.c()["y"].eq("hi"));
/// ```
pub fn select<S: Into<Selectable>>(items: impl IntoIterator<Item = S>) -> Select {
    let mut stmt = Select::default();
    for item in items {
        match item.into() {
            Selectable::Table(table) => {
                stmt.add_from(table.name());
                stmt.columns.extend(table.columns().iter().map(Expr::col));
            }
            Selectable::Expr(expr) => stmt.columns.push(expr),
        }
    }
    stmt
}

impl Select {
    fn add_from(&mut self, name: &str) {
        if !self.from.iter().any(|t| t == name) {
            self.from.push(name.to_string());
        }
    }

    /// Add an explicit FROM table.
    pub fn select_from(mut self, table: &Table) -> Self {
        self.add_from(table.name());
        self
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn where_(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn order_by(mut self, term: impl Into<OrderBy>) -> Self {
        self.order_by.push(term.into());
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Label every column `table_column`.
    pub fn apply_labels(mut self) -> Self {
        self.use_labels = true;
        self
    }

    pub fn columns(&self) -> &[Expr] {
        &self.columns
    }

    pub fn where_clause(&self) -> Option<&Expr> {
        self.where_clause.as_ref()
    }

    fn from_tables(&self) -> Vec<String> {
        let mut names = self.from.clone();
        let mut add = |c: &Arc<Column>| {
            if !names.iter().any(|n| n == c.table_name()) {
                names.push(c.table_name().to_string());
            }
        };
        for expr in &self.columns {
            expr.for_each_column(&mut add);
        }
        if let Some(w) = &self.where_clause {
            w.for_each_column(&mut add);
        }
        names
    }

    /// Compile for a dialect.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn compile(&self, dialect: Dialect) -> Compiled {
        let mut c = SqlCompiler::new(dialect);
        let labels = if self.use_labels {
            Labels::Qualified
        } else {
            Labels::Anonymous
        };

        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|e| c.result_element(e, labels, true))
            .collect();
        let mut sql = format!("SELECT {}", cols.join(", "));

        let from = self.from_tables();
        if !from.is_empty() {
            let tables: Vec<String> = from.iter().map(|t| c.ident(t)).collect();
            sql.push_str(" FROM ");
            sql.push_str(&tables.join(", "));
        }
        if let Some(w) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&c.expr(w, true));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&c.order_by(&self.order_by, true));
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        if let Some(n) = self.offset {
            if self.limit.is_none() {
                // SQLite requires LIMIT before OFFSET
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {n}"));
        }
        c.finish(sql, StatementKind::Select, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ColumnExpr;
    use crate::func;
    use crate::schema::column;
    use crate::types::{Integer, StringType};

    fn users() -> Table {
        Table::new(
            "users",
            [
                column("id", Integer).primary_key(),
                column("name", StringType::new()),
            ],
        )
    }

    #[test]
    fn plain_columns_and_where() {
        let t = users();
        let stmt = select([&t])
            .where_(t.c()["name"].eq("ed"))
            .order_by(t.c()["id"].desc())
            .limit(1);
        let compiled = stmt.compile(Dialect::Default);
        assert_eq!(
            compiled.sql(),
            "SELECT users.id, users.name FROM users WHERE users.name = :name_1 \
             ORDER BY users.id DESC LIMIT 1"
        );
        assert_eq!(compiled.bind_names(), vec!["name_1"]);
        assert_eq!(compiled.result_map()[1].name, "name");
    }

    #[test]
    fn expressions_get_anonymous_labels() {
        let t = users();
        let compiled = select([func::count(&t.c()["id"])]).compile(Dialect::Default);
        assert_eq!(
            compiled.sql(),
            "SELECT count(users.id) AS count_1 FROM users"
        );
        assert!(compiled.result_column("count_1").is_some());
    }

    #[test]
    fn reserved_and_mixed_case_identifiers_are_quoted() {
        let t = Table::new("user", [column("Name", StringType::new())]);
        let compiled = select([&t]).compile(Dialect::Default);
        assert_eq!(compiled.sql(), "SELECT \"user\".\"Name\" FROM \"user\"");
    }

    #[test]
    fn offset_without_limit() {
        let t = users();
        let compiled = select([&t.c()["id"]]).offset(2).compile(Dialect::Sqlite);
        assert_eq!(
            compiled.sql(),
            "SELECT users.id FROM users LIMIT -1 OFFSET 2"
        );
    }
}
