//! Table metadata, typed SQL expressions and the statement compiler.
//!
//! `ormscope-query` is the **SQL layer**:
//!
//! - **Schema**: `Table`, `Column` and `MetaData`, with columns shared as
//!   `Arc<Column>` so compiled results can point back at them.
//! - **Types**: `TypeEngine` and `TypeDecorator`, whose bind and column
//!   expressions rewrite SQL going in and out of the database.
//! - **Statements**: `select`, `Table::insert/update/delete`, DDL, and
//!   `execute` over any `Connection`.
//!
//! ```ignore
//! let compiled = select([&table]).where_(table.c()["y"].eq("hi")).compile(Dialect::Default);
//! assert_eq!(
//!     compiled.sql(),
//!     "SELECT test_table.x, lower(test_table.y) AS y_1 FROM test_table \
//!      WHERE test_table.y = lower(:y_2)"
//! );
//! ```

pub mod compiler;
pub mod ddl;
pub mod dml;
pub mod execute;
pub mod expr;
pub mod func;
pub mod params;
pub mod result;
pub mod schema;
pub mod select;
pub mod types;

pub use compiler::{Compiled, CompiledBind, ResultColumn, StatementKind, compile_expr};
pub use ddl::{CreateTable, DropTable};
pub use dml::{Delete, Insert, Update};
pub use execute::{Statement, TextClause, execute, execute_compiled, text};
pub use expr::{BinaryOp, BindParam, ColumnExpr, Expr, OrderBy};
pub use params::Params;
pub use result::{ResultRow, ResultSet};
pub use schema::{Column, ColumnCollection, ColumnDef, ForeignKey, MetaData, Table, column};
pub use select::{Select, Selectable, select};
pub use types::{Boolean, Decorator, Float, Integer, StringType, TypeDecorator, TypeEngine, TypeRef};
