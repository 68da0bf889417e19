//! ormscope - inspectable object-relational mapping with typed SQL coercion.
//!
//! ormscope provides:
//!
//! - Runtime class mapping with a uniform `inspect()` over classes,
//!   instances and class attributes
//! - Instance lifecycle tracking and per-attribute history
//! - Column types whose bind and column expressions rewrite the SQL the
//!   compiler emits
//! - A unit-of-work `Session` and a bundled SQLite driver
//!
//! # Quick Start
//!
//! ```ignore
//! use ormscope::prelude::*;
//!
//! let mut metadata = MetaData::new();
//! let users = metadata.table(
//!     "users",
//!     [column("id", Integer).primary_key(), column("name", StringType::new())],
//! );
//!
//! let registry = Registry::new();
//! let user = registry.map("User", &users).build()?;
//!
//! let conn = SqliteConnection::open_memory()?;
//! metadata.create_all(&cx, &conn).await;
//!
//! let mut session = Session::new(conn);
//! let ed = user.create([("name", "ed")])?;
//! session.add(&ed)?;
//! session.flush(&cx).await;
//!
//! let state = inspect(&ed);
//! assert!(state.is_persistent());
//! ```

// Re-export all public types from sub-crates
pub use ormscope_core::{
    // asupersync re-exports
    Connection,
    Cx,
    Dialect,
    Error,
    InspectionError,
    InspectionErrorKind,
    Outcome,
    Result,
    Row,
    SqlType,
    Value,
    try_outcome,
    try_result,
};

pub use ormscope_query::{
    Boolean, ColumnExpr, Column, Compiled, Decorator, Expr, Float, Integer, MetaData, OrderBy,
    Params, ResultRow, ResultSet, Select, Statement, StringType, Table, TypeDecorator, TypeEngine,
    column, execute, func, select, text,
};

pub use ormscope_session::{
    AttrValue, ClassAttribute, History, HistoryItem, Instance, InstanceState, LoadedValue,
    MappedClass, Mapper, MapperProperty, Registry, Session, SessionConfig, Status, class_mapper,
    column_property, inspect, instance_state, many_to_one, one_to_many, synonym,
};

pub use ormscope_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

/// Sub-crates, for items not re-exported at the top level.
pub mod query {
    pub use ormscope_query::*;
}

pub mod orm {
    pub use ormscope_session::*;
}

pub mod sqlite {
    pub use ormscope_sqlite::*;
}

/// Everything needed to map, query and inspect.
pub mod prelude {
    pub use crate::{
        // Core
        Connection,
        Cx,
        Dialect,
        Error,
        Outcome,
        Result,
        Value,
        // SQL
        ColumnExpr,
        Expr,
        Integer,
        MetaData,
        Params,
        StringType,
        Table,
        TypeDecorator,
        TypeEngine,
        column,
        execute,
        func,
        select,
        // ORM
        AttrValue,
        Instance,
        LoadedValue,
        MappedClass,
        Registry,
        Session,
        SessionConfig,
        inspect,
        many_to_one,
        one_to_many,
        synonym,
        // Driver
        SqliteConnection,
    };
}
