//! SQLite driver for ormscope.
//!
//! Links the bundled SQLite amalgamation through `libsqlite3-sys` and
//! implements `ormscope_core::Connection`, so sessions and compiled
//! statements run against it with `?N` placeholders.
//!
//! ```rust,ignore
//! use ormscope_core::{Connection, Cx, Value};
//! use ormscope_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};
//!
//! let conn = SqliteConnection::open(&SqliteConfig::file("app.db").flags(OpenFlags::CreateReadWrite))?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert(&cx, "INSERT INTO users (name) VALUES (?1)", &[Value::from("ed")]).await;
//! ```
//!
//! | `Value` | stored as |
//! |---------|-----------|
//! | `Bool` | INTEGER 0/1 |
//! | `Int`, `BigInt` | INTEGER, read back as `BigInt` |
//! | `Double` | REAL |
//! | `Text`, `Json` | TEXT |
//! | `Bytes` | BLOB |

#![allow(unsafe_code)]

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};
pub use types::version as sqlite_version;
