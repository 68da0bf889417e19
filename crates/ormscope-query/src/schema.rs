//! Table and column metadata.
//!
//! Columns are shared as `Arc<Column>` and compared by pointer: two columns
//! are "the same column" only if they came out of the same `Table`. Result
//! rows, mapper properties and compiled statements all rely on that identity.

use crate::types::{TypeEngine, TypeRef};
use ormscope_core::Value;
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

/// Target of a foreign key, as `table.column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

impl ForeignKey {
    /// Parse a `table.column` reference.
    pub fn parse(target: &str) -> Option<Self> {
        let (table, column) = target.split_once('.')?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

/// A column that belongs to a [`Table`].
#[derive(Debug)]
pub struct Column {
    name: String,
    key: String,
    table: String,
    type_: TypeRef,
    primary_key: bool,
    nullable: bool,
    autoincrement: bool,
    server_default: Option<Value>,
    foreign_key: Option<ForeignKey>,
}

impl Column {
    /// Column name in SQL.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key used in `table.c()` and in parameter sets. Defaults to the name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Name of the owning table.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn type_engine(&self) -> &TypeRef {
        &self.type_
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the database generates this column's value on insert.
    pub fn is_autoincrement(&self) -> bool {
        self.autoincrement
    }

    pub fn server_default(&self) -> Option<&Value> {
        self.server_default.as_ref()
    }

    pub fn foreign_key(&self) -> Option<&ForeignKey> {
        self.foreign_key.as_ref()
    }

    /// `table_column`, the label `apply_labels()` gives this column.
    pub fn qualified_label(&self) -> String {
        format!("{}_{}", self.table, self.name)
    }
}

/// Builder for a column, turned into a [`Column`] by [`Table::new`].
#[derive(Debug)]
pub struct ColumnDef {
    name: String,
    key: Option<String>,
    type_: TypeRef,
    primary_key: bool,
    nullable: Option<bool>,
    autoincrement: Option<bool>,
    server_default: Option<Value>,
    foreign_key: Option<String>,
}

/// Start a column definition.
pub fn column(name: impl Into<String>, type_: impl TypeEngine + 'static) -> ColumnDef {
    ColumnDef::new(name, Arc::new(type_))
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, type_: TypeRef) -> Self {
        Self {
            name: name.into(),
            key: None,
            type_,
            primary_key: false,
            nullable: None,
            autoincrement: None,
            server_default: None,
            foreign_key: None,
        }
    }

    /// Use a different key than the column name.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Override autoincrement detection.
    ///
    /// By default a lone integer primary key autoincrements.
    pub fn autoincrement(mut self, autoincrement: bool) -> Self {
        self.autoincrement = Some(autoincrement);
        self
    }

    /// Value the database fills in when the column is omitted from an INSERT.
    pub fn server_default(mut self, value: impl Into<Value>) -> Self {
        self.server_default = Some(value.into());
        self
    }

    /// Reference another column as `table.column`.
    pub fn foreign_key(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    fn build(self, table: &str, lone_pk: bool) -> Column {
        let autoincrement = self
            .autoincrement
            .unwrap_or(lone_pk && self.primary_key && self.type_.sql_type().is_integer());
        let foreign_key = self.foreign_key.as_deref().and_then(|target| {
            let parsed = ForeignKey::parse(target);
            if parsed.is_none() {
                tracing::warn!(
                    table = table,
                    column = %self.name,
                    target = target,
                    "Ignoring malformed foreign key target"
                );
            }
            parsed
        });
        Column {
            key: self.key.unwrap_or_else(|| self.name.clone()),
            nullable: self.nullable.unwrap_or(!self.primary_key),
            table: table.to_string(),
            type_: self.type_,
            primary_key: self.primary_key,
            autoincrement,
            server_default: self.server_default,
            foreign_key,
            name: self.name,
        }
    }
}

/// Ordered, keyed collection of a table's columns.
#[derive(Debug, Default)]
pub struct ColumnCollection {
    columns: Vec<Arc<Column>>,
    by_key: HashMap<String, usize>,
}

impl ColumnCollection {
    fn push(&mut self, column: Arc<Column>) {
        self.by_key
            .insert(column.key().to_string(), self.columns.len());
        self.columns.push(column);
    }

    /// Look a column up by key.
    pub fn get(&self, key: &str) -> Option<&Arc<Column>> {
        self.by_key.get(key).map(|&i| &self.columns[i])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Column>> {
        self.columns.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.key())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn as_slice(&self) -> &[Arc<Column>] {
        &self.columns
    }
}

impl Index<&str> for ColumnCollection {
    type Output = Arc<Column>;

    /// Panics if the key is unknown; use [`ColumnCollection::get`] otherwise.
    fn index(&self, key: &str) -> &Self::Output {
        match self.get(key) {
            Some(column) => column,
            None => panic!("no column with key '{key}'"),
        }
    }
}

impl<'a> IntoIterator for &'a ColumnCollection {
    type Item = &'a Arc<Column>;
    type IntoIter = std::slice::Iter<'a, Arc<Column>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct TableInner {
    name: String,
    columns: ColumnCollection,
}

/// A database table. Cloning shares the same columns.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    /// Build a table from its column definitions, in declaration order.
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        let name = name.into();
        let defs: Vec<ColumnDef> = columns.into_iter().collect();
        let lone_pk = defs.iter().filter(|d| d.primary_key).count() == 1;
        let mut collection = ColumnCollection::default();
        for def in defs {
            collection.push(Arc::new(def.build(&name, lone_pk)));
        }
        Self {
            inner: Arc::new(TableInner {
                name,
                columns: collection,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The column collection, addressable as `table.c()["y"]`.
    pub fn c(&self) -> &ColumnCollection {
        &self.inner.columns
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Arc<Column>] {
        self.inner.columns.as_slice()
    }

    /// Primary-key columns in declaration order.
    pub fn primary_key(&self) -> Vec<Arc<Column>> {
        self.columns()
            .iter()
            .filter(|c| c.is_primary_key())
            .cloned()
            .collect()
    }

    /// Whether `column` is one of this table's own columns.
    pub fn owns(&self, column: &Arc<Column>) -> bool {
        self.columns().iter().any(|c| Arc::ptr_eq(c, column))
    }

    /// Foreign-key columns pointing at `target`.
    pub fn foreign_keys_to(&self, target: &str) -> Vec<Arc<Column>> {
        self.columns()
            .iter()
            .filter(|c| c.foreign_key().is_some_and(|fk| fk.table == target))
            .cloned()
            .collect()
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.inner.name)
            .field("columns", &self.c().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A collection of tables that are created and dropped together.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    tables: Vec<Table>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a table and register it.
    pub fn table(
        &mut self,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = ColumnDef>,
    ) -> Table {
        let table = Table::new(name, columns);
        self.add(table.clone());
        table
    }

    /// Register an existing table, replacing any table with the same name.
    pub fn add(&mut self, table: Table) {
        self.tables.retain(|t| t.name() != table.name());
        self.tables.push(table);
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// Tables in registration order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Tables ordered so that every foreign-key target precedes its referrers.
    ///
    /// Cycles fall back to registration order for the remaining tables.
    pub fn sorted_tables(&self) -> Vec<Table> {
        let mut remaining: Vec<Table> = self.tables.clone();
        let mut sorted: Vec<Table> = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready = remaining.iter().position(|t| {
                t.columns().iter().all(|c| match c.foreign_key() {
                    Some(fk) => {
                        fk.table == t.name()
                            || sorted.iter().any(|s| s.name() == fk.table)
                            || self.get(&fk.table).is_none()
                    }
                    None => true,
                })
            });
            sorted.push(remaining.remove(ready.unwrap_or(0)));
        }
        sorted
    }
}
