//! CREATE TABLE / DROP TABLE and `MetaData::create_all`.

use crate::schema::{Column, MetaData, Table};
use asupersync::{Cx, Outcome};
use ormscope_core::{Connection, Dialect, Error, Value, try_outcome};

/// Render a value as a SQL literal for DDL defaults.
fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(n) => n.to_string(),
        Value::BigInt(n) => n.to_string(),
        Value::Double(n) => n.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
            format!("X'{hex}'")
        }
    }
}

/// Builder for CREATE TABLE statements.
#[derive(Debug, Clone)]
pub struct CreateTable {
    table: Table,
    if_not_exists: bool,
}

impl CreateTable {
    pub fn new(table: &Table) -> Self {
        Self {
            table: table.clone(),
            if_not_exists: false,
        }
    }

    /// Add IF NOT EXISTS clause.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Build the CREATE TABLE SQL.
    pub fn build(&self, dialect: Dialect) -> String {
        let mut sql = String::from("CREATE TABLE ");
        if self.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&dialect.format_identifier(self.table.name()));
        sql.push_str(" (\n");

        let mut parts: Vec<String> = self
            .table
            .columns()
            .iter()
            .map(|c| column_definition(c, dialect))
            .collect();

        let pk: Vec<String> = self
            .table
            .primary_key()
            .iter()
            .map(|c| dialect.format_identifier(c.name()))
            .collect();
        if !pk.is_empty() {
            parts.push(format!("  PRIMARY KEY ({})", pk.join(", ")));
        }

        for column in self.table.columns() {
            if let Some(fk) = column.foreign_key() {
                parts.push(format!(
                    "  FOREIGN KEY({}) REFERENCES {} ({})",
                    dialect.format_identifier(column.name()),
                    dialect.format_identifier(&fk.table),
                    dialect.format_identifier(&fk.column)
                ));
            }
        }

        sql.push_str(&parts.join(",\n"));
        sql.push_str("\n)");
        sql
    }
}

fn column_definition(column: &Column, dialect: Dialect) -> String {
    let mut def = format!(
        "  {} {}",
        dialect.format_identifier(column.name()),
        column.type_engine().sql_type().sql_name()
    );
    if !column.is_nullable() {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = column.server_default() {
        def.push_str(" DEFAULT ");
        def.push_str(&render_literal(default));
    }
    def
}

/// Builder for DROP TABLE statements.
#[derive(Debug, Clone)]
pub struct DropTable {
    name: String,
    if_exists: bool,
}

impl DropTable {
    pub fn new(table: &Table) -> Self {
        Self {
            name: table.name().to_string(),
            if_exists: false,
        }
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn build(&self, dialect: Dialect) -> String {
        let exists = if self.if_exists { "IF EXISTS " } else { "" };
        format!("DROP TABLE {exists}{}", dialect.format_identifier(&self.name))
    }
}

impl MetaData {
    /// Create every table that does not exist yet, referenced tables first.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn create_all<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        for table in self.sorted_tables() {
            let sql = CreateTable::new(&table).if_not_exists().build(conn.dialect());
            tracing::debug!(table = table.name(), "Creating table");
            try_outcome!(conn.execute(cx, &sql, &[]).await);
        }
        Outcome::Ok(())
    }

    /// Drop every table that exists, referencing tables first.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn drop_all<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        for table in self.sorted_tables().iter().rev() {
            let sql = DropTable::new(table).if_exists().build(conn.dialect());
            tracing::debug!(table = table.name(), "Dropping table");
            try_outcome!(conn.execute(cx, &sql, &[]).await);
        }
        Outcome::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column;
    use crate::types::{Integer, StringType};

    #[test]
    fn create_table_sql() {
        let users = Table::new(
            "users",
            [
                column("id", Integer).primary_key(),
                column("name", StringType::with_length(50)).nullable(false),
            ],
        );
        let addresses = Table::new(
            "addresses",
            [
                column("id", Integer).primary_key(),
                column("user_id", Integer).foreign_key("users.id"),
                column("email", StringType::new()).server_default("it's@none"),
            ],
        );
        assert_eq!(
            CreateTable::new(&users).build(Dialect::Sqlite),
            "CREATE TABLE users (\n  id INTEGER NOT NULL,\n  name VARCHAR(50) NOT NULL,\n  PRIMARY KEY (id)\n)"
        );
        assert_eq!(
            CreateTable::new(&addresses).if_not_exists().build(Dialect::Sqlite),
            "CREATE TABLE IF NOT EXISTS addresses (\n  id INTEGER NOT NULL,\n  user_id INTEGER,\n  \
             email TEXT DEFAULT 'it''s@none',\n  PRIMARY KEY (id),\n  FOREIGN KEY(user_id) REFERENCES users (id)\n)"
        );
    }

    #[test]
    fn drop_table_sql() {
        let t = Table::new("order", [column("id", Integer)]);
        assert_eq!(
            DropTable::new(&t).if_exists().build(Dialect::Sqlite),
            "DROP TABLE IF EXISTS \"order\""
        );
    }

    #[test]
    fn literals() {
        assert_eq!(render_literal(&Value::Bool(true)), "1");
        assert_eq!(render_literal(&Value::Bytes(vec![0xAB, 0x01])), "X'AB01'");
        assert_eq!(render_literal(&Value::Null), "NULL");
    }
}
