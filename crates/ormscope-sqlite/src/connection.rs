//! The SQLite `Connection`.
//!
//! Wraps the C API from `libsqlite3-sys` behind a mutex and implements the
//! `Connection` trait from ormscope-core.

// Casts and raw pointers match the C API exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)]

use crate::types;
mod ffi {
    pub use libsqlite3_sys::*;

    // libsqlite3-sys omits `sqlite3_close_v2` from its bindings; the symbol is
    // still provided by the bundled SQLite library.
    unsafe extern "C" {
        pub fn sqlite3_close_v2(db: *mut sqlite3) -> std::ffi::c_int;
    }
}
use ormscope_core::{
    ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Cx, Dialect, Error, Outcome,
    QueryError, QueryErrorKind, Row, Value,
};
use std::ffi::{CStr, CString, c_int};
use std::future::Future;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenFlags {
    ReadOnly,
    /// The file must already exist.
    ReadWrite,
    #[default]
    CreateReadWrite,
}

impl OpenFlags {
    fn bits(self, uri: bool) -> c_int {
        let mode = match self {
            OpenFlags::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            OpenFlags::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
            OpenFlags::CreateReadWrite => ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        };
        let uri = if uri { ffi::SQLITE_OPEN_URI } else { 0 };
        mode | uri | ffi::SQLITE_OPEN_FULLMUTEX
    }
}

/// Where and how to open a database.
///
/// ```rust,ignore
/// let config = SqliteConfig::file("app.db")
///     .flags(OpenFlags::ReadWrite)
///     .busy_timeout(250);
/// ```
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// A filename, `:memory:`, or a `file:` URI when `uri` is set.
    pub path: String,
    pub flags: OpenFlags,
    pub uri: bool,
    /// Milliseconds to wait on a locked database; 0 fails immediately.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::file(":memory:")
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::default(),
            uri: false,
            busy_timeout_ms: 5000,
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Interpret `path` as a `file:` URI.
    pub fn uri(mut self, uri: bool) -> Self {
        self.uri = uri;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is opened with SQLITE_OPEN_FULLMUTEX and every access
// goes through the Mutex in SqliteConnection.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
///
/// Thread-safe: the handle lives behind a `Mutex`, so the connection can be
/// shared across async tasks.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| Error::config(format!("database path {:?} contains a NUL byte", config.path)))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.bits(config.uri);

        // SAFETY: valid pointers; the return value is checked below
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                types::error_string(rc)
            } else {
                // SAFETY: db is a (failed) handle that must still be closed
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database '{}': {}", config.path, msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        tracing::debug!(path = %config.path, sqlite = types::version(), "Opened SQLite database");

        Ok(Self {
            inner: Mutex::new(SqliteInner { db }),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open (creating if needed) a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self, Error> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute one or more statements without parameters or results.
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        let inner = self.lock();
        let c_sql = sql_cstring(sql)?;
        let mut err: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut err)
        };

        if rc != ffi::SQLITE_OK {
            let message = if err.is_null() {
                types::error_string(rc)
            } else {
                // SAFETY: err was allocated by sqlite3_exec
                unsafe {
                    let msg = CStr::from_ptr(err).to_string_lossy().into_owned();
                    ffi::sqlite3_free(err.cast());
                    msg
                }
            };
            return Err(query_error(error_code_to_kind(rc), sql, message));
        }
        Ok(())
    }

    /// Row id of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> i64 {
        let inner = self.lock();
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(inner.db) }
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> i32 {
        let inner = self.lock();
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_changes(inner.db) }
    }

    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let inner = self.lock();
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            // SAFETY: stmt is valid, index in range
            .map(|i| unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{i}")))
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(inner.db, sql)),
            }
        }
        tracing::trace!(sql, rows = rows.len(), "Query complete");
        Ok(rows)
    }

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let inner = self.lock();
        Self::execute_locked(&inner, sql, params)
    }

    fn execute_locked(inner: &SqliteInner, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        match unsafe { ffi::sqlite3_step(stmt.raw) } {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let changes = unsafe { ffi::sqlite3_changes(inner.db) };
                tracing::trace!(sql, changes, "Statement complete");
                Ok(u64::try_from(changes).unwrap_or_default())
            }
            _ => Err(step_error(inner.db, sql)),
        }
    }

    /// Execute an INSERT and return its row id, under one lock so no other
    /// statement can interleave.
    fn insert_sync(&self, sql: &str, params: &[Value]) -> Result<i64, Error> {
        let inner = self.lock();
        Self::execute_locked(&inner, sql, params)?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and not used after this point
            unsafe {
                ffi::sqlite3_close_v2(inner.db);
            }
        }
    }
}

/// A prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    sql: String,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self, Error> {
        let c_sql = sql_cstring(sql)?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(step_error(db, sql));
        }
        Ok(Self {
            raw,
            db,
            sql: sql.to_string(),
        })
    }

    fn bind_all(&self, params: &[Value]) -> Result<(), Error> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { errmsg(self.db) };
                return Err(query_error(
                    QueryErrorKind::Database,
                    &self.sql,
                    format!("Failed to bind parameter {}: {}", i + 1, msg),
                ));
            }
        }
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw came from sqlite3_prepare_v2 (finalizing null is a no-op)
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

/// Wrap a result computed under the connection lock.
///
/// The C API is blocking; work happens before the future is returned so no
/// raw pointer is held across an await.
fn ready<T: Send>(result: Result<T, Error>) -> impl Future<Output = Outcome<T, Error>> + Send {
    std::future::ready(match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    })
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        ready(self.query_sync(sql, params))
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        ready(self.query_sync(sql, params).map(|rows| rows.into_iter().next()))
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        ready(self.execute_sync(sql, params))
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        ready(self.insert_sync(sql, params))
    }

    fn batch(
        &self,
        _cx: &Cx,
        statements: &[(String, Vec<Value>)],
    ) -> impl Future<Output = Outcome<Vec<u64>, Error>> + Send {
        let inner = self.lock();
        ready(
            statements
                .iter()
                .map(|(sql, params)| Self::execute_locked(&inner, sql, params))
                .collect(),
        )
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        ready(self.query_sync("SELECT 1", &[]).map(drop))
    }

    async fn close(self, _cx: &Cx) -> ormscope_core::Result<()> {
        let rc = {
            let mut inner = self.lock();
            let db = std::mem::replace(&mut inner.db, ptr::null_mut());
            // SAFETY: db came from sqlite3_open_v2 and is not used again
            unsafe { ffi::sqlite3_close_v2(db) }
        };
        tracing::debug!(path = %self.path, rc, "Closed SQLite database");
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("closing '{}' failed: {}", self.path, types::error_string(rc)),
                source: None,
            }))
        }
    }
}

fn sql_cstring(sql: &str) -> Result<CString, Error> {
    CString::new(sql).map_err(|_| {
        query_error(
            QueryErrorKind::Syntax,
            sql,
            "SQL contains null byte".to_string(),
        )
    })
}

fn query_error(kind: QueryErrorKind, sql: &str, message: String) -> Error {
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

/// # Safety
/// `db` must be a valid handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        if ptr.is_null() {
            return String::new();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (code, msg) = unsafe { (ffi::sqlite3_errcode(db), errmsg(db)) };
    query_error(error_code_to_kind(code), sql, msg)
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        _ => QueryErrorKind::Database,
    }
}
