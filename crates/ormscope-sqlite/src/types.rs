//! Moving `Value`s across the C boundary.
//!
//! SQLite stores INTEGER, REAL, TEXT, BLOB or NULL. Integers always come back
//! as `Value::BigInt`; booleans are written as 0/1 and JSON as its text.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use libsqlite3_sys as ffi;
use ormscope_core::Value;
use std::ffi::{CStr, c_char, c_int};

/// Bind `value` to the 1-based parameter `index`.
///
/// # Safety
/// `stmt` must be a live prepared statement and `index` within its
/// parameter count.
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: scalars are copied by value; buffers are copied by SQLite
    // because of SQLITE_TRANSIENT
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int(stmt, index, c_int::from(*b)),
            Value::Int(v) => ffi::sqlite3_bind_int(stmt, index, *v),
            Value::BigInt(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => bind_text(stmt, index, s),
            Value::Json(json) => bind_text(stmt, index, &json.to_string()),
            Value::Bytes(b) => ffi::sqlite3_bind_blob(
                stmt,
                index,
                b.as_ptr().cast(),
                b.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            ),
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, text: &str) -> c_int {
    unsafe {
        ffi::sqlite3_bind_text(
            stmt,
            index,
            text.as_ptr().cast::<c_char>(),
            text.len() as c_int,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

/// The bytes of a TEXT or BLOB cell. Empty when SQLite hands back NULL.
unsafe fn cell_bytes<'a>(stmt: *mut ffi::sqlite3_stmt, index: c_int, ptr: *const u8) -> &'a [u8] {
    if ptr.is_null() {
        return &[];
    }
    // SAFETY: the length is asked for after the pointer, per the C API rules
    unsafe {
        let len = ffi::sqlite3_column_bytes(stmt, index);
        std::slice::from_raw_parts(ptr, len as usize)
    }
}

/// Read column `index` of the current row.
///
/// # Safety
/// `stmt` must have just returned `SQLITE_ROW` and `index` must be in range.
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::BigInt(ffi::sqlite3_column_int64(stmt, index)),
            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                Value::Text(String::from_utf8_lossy(cell_bytes(stmt, index, ptr)).into_owned())
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index).cast::<u8>();
                Value::Bytes(cell_bytes(stmt, index, ptr).to_vec())
            }
            _ => Value::Null,
        }
    }
}

/// Result column name as SQLite reports it (the `AS` label when present).
///
/// # Safety
/// `stmt` must be a live prepared statement and `index` in range.
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: the name pointer lives as long as the statement
    unsafe { static_str(ffi::sqlite3_column_name(stmt, index)) }.map(str::to_owned)
}

/// # Safety
/// `ptr` must be null or a NUL-terminated string outliving `'a`.
unsafe fn static_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null and NUL-terminated per the contract above
        unsafe { CStr::from_ptr(ptr) }.to_str().ok()
    }
}

pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe { static_str(ffi::sqlite3_libversion()) }.unwrap_or("unknown")
}

/// English text for a result code.
pub fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string or null
    match unsafe { static_str(ffi::sqlite3_errstr(code)) } {
        Some(msg) => msg.to_owned(),
        None => format!("sqlite error {code}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_library_is_sqlite3() {
        assert!(version().starts_with('3'));
    }

    #[test]
    fn result_codes_have_messages() {
        assert_eq!(error_string(ffi::SQLITE_OK), "not an error");
        assert_eq!(error_string(ffi::SQLITE_BUSY), "database is locked");
        assert_eq!(error_string(ffi::SQLITE_CONSTRAINT), "constraint failed");
    }
}
