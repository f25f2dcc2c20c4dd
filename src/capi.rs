//! C-ABI surface: a thin `extern "C"` wrapper over the embedded library.
//!
//! Functions return the stable `ErrorCode` discriminants; `zqlite_step`
//! additionally returns ZQLITE_ROW / ZQLITE_DONE. Strings cross the
//! boundary as NUL-terminated UTF-8, blobs as (pointer, length). Every
//! object handed out has an explicit free entry point.
#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_double, c_int, c_uchar, CStr, CString};
use std::path::Path;
use std::ptr;

use crate::error::ErrorCode;
use crate::sql::exec::Row;
use crate::{Connection, Database, Statement, Value, ZqError};

pub const ZQLITE_ROW: c_int = 100;
pub const ZQLITE_DONE: c_int = 101;

pub struct ZqConn {
    // The Database handle stays alive as long as the connection does.
    _db: Database,
    conn: Connection,
    last_error: Option<CString>,
}

pub struct ZqStmt {
    conn: *mut ZqConn,
    stmt: Statement,
    current: Option<Row>,
    /// Owned C strings for the current row's text renderings.
    text_cache: Vec<CString>,
}

pub struct ZqResult {
    rows: Vec<Row>,
    text_cache: Vec<CString>,
}

fn set_error(conn: &mut ZqConn, err: &ZqError) -> c_int {
    let rendered = err.to_string().replace('\0', " ");
    conn.last_error = CString::new(rendered).ok();
    err.code() as c_int
}

unsafe fn path_from_cstr<'a>(path: *const c_char) -> Option<&'a Path> {
    if path.is_null() {
        return None;
    }
    CStr::from_ptr(path).to_str().ok().map(Path::new)
}

/// Open (or create) a database and hand back a connection handle.
///
/// # Safety
/// `path` must be a valid NUL-terminated string; `out` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn zqlite_open(path: *const c_char, out: *mut *mut ZqConn) -> c_int {
    if out.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    *out = ptr::null_mut();
    let Some(path) = path_from_cstr(path) else {
        return ErrorCode::Misuse as c_int;
    };
    match Database::open_or_create(path) {
        Ok(db) => {
            let conn = db.connect();
            let handle = Box::new(ZqConn {
                _db: db,
                conn,
                last_error: None,
            });
            *out = Box::into_raw(handle);
            ErrorCode::Ok as c_int
        }
        Err(e) => e.code() as c_int,
    }
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_close(conn: *mut ZqConn) -> c_int {
    if conn.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    drop(Box::from_raw(conn));
    ErrorCode::Ok as c_int
}

/// Last error message for the connection, or NULL.
#[no_mangle]
pub unsafe extern "C" fn zqlite_errmsg(conn: *mut ZqConn) -> *const c_char {
    if conn.is_null() {
        return ptr::null();
    }
    match &(*conn).last_error {
        Some(msg) => msg.as_ptr(),
        None => ptr::null(),
    }
}

/// One-shot execution. On success `out_result` (if non-NULL) receives a
/// result object the caller must free with `zqlite_free_result`.
#[no_mangle]
pub unsafe extern "C" fn zqlite_execute(
    conn: *mut ZqConn,
    sql: *const c_char,
    out_result: *mut *mut ZqResult,
) -> c_int {
    if conn.is_null() || sql.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    if !out_result.is_null() {
        *out_result = ptr::null_mut();
    }
    let conn = &mut *conn;
    let Ok(sql) = CStr::from_ptr(sql).to_str() else {
        return ErrorCode::Misuse as c_int;
    };
    match conn.conn.execute(sql) {
        Ok(result) => {
            if !out_result.is_null() {
                let rows = match result {
                    crate::ExecResult::Rows(rows) => rows,
                    _ => Vec::new(),
                };
                let handle = Box::new(ZqResult {
                    rows,
                    text_cache: Vec::new(),
                });
                *out_result = Box::into_raw(handle);
            }
            ErrorCode::Ok as c_int
        }
        Err(e) => set_error(conn, &e),
    }
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_result_row_count(result: *mut ZqResult) -> c_int {
    if result.is_null() {
        return 0;
    }
    (*result).rows.len() as c_int
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_result_column_count(result: *mut ZqResult) -> c_int {
    if result.is_null() {
        return 0;
    }
    (*result).rows.first().map_or(0, |r| r.values.len() as c_int)
}

/// Text rendering of one cell; owned by the result object.
#[no_mangle]
pub unsafe extern "C" fn zqlite_result_text(
    result: *mut ZqResult,
    row: c_int,
    col: c_int,
) -> *const c_char {
    if result.is_null() || row < 0 || col < 0 {
        return ptr::null();
    }
    let result = &mut *result;
    let Some(row) = result.rows.get(row as usize) else {
        return ptr::null();
    };
    let Some((_, value)) = row.values.get(col as usize) else {
        return ptr::null();
    };
    let rendered = value.to_string().replace('\0', " ");
    let Ok(cstring) = CString::new(rendered) else {
        return ptr::null();
    };
    result.text_cache.push(cstring);
    result.text_cache.last().expect("BUG: just pushed").as_ptr()
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_free_result(result: *mut ZqResult) {
    if !result.is_null() {
        drop(Box::from_raw(result));
    }
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_prepare(
    conn: *mut ZqConn,
    sql: *const c_char,
    out: *mut *mut ZqStmt,
) -> c_int {
    if conn.is_null() || sql.is_null() || out.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    *out = ptr::null_mut();
    let conn_ref = &mut *conn;
    let Ok(sql) = CStr::from_ptr(sql).to_str() else {
        return ErrorCode::Misuse as c_int;
    };
    match Statement::prepare(sql) {
        Ok(stmt) => {
            let handle = Box::new(ZqStmt {
                conn,
                stmt,
                current: None,
                text_cache: Vec::new(),
            });
            *out = Box::into_raw(handle);
            ErrorCode::Ok as c_int
        }
        Err(e) => set_error(conn_ref, &e),
    }
}

unsafe fn bind(stmt: *mut ZqStmt, slot: c_int, value: Value) -> c_int {
    if stmt.is_null() || slot < 1 {
        return ErrorCode::Range as c_int;
    }
    let stmt = &mut *stmt;
    match stmt.stmt.bind(slot as usize, value) {
        Ok(()) => ErrorCode::Ok as c_int,
        Err(e) => {
            if !stmt.conn.is_null() {
                set_error(&mut *stmt.conn, &e)
            } else {
                e.code() as c_int
            }
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_bind_int(stmt: *mut ZqStmt, slot: c_int, value: i64) -> c_int {
    bind(stmt, slot, Value::Integer(value))
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_bind_real(
    stmt: *mut ZqStmt,
    slot: c_int,
    value: c_double,
) -> c_int {
    bind(stmt, slot, Value::Real(value))
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_bind_text(
    stmt: *mut ZqStmt,
    slot: c_int,
    value: *const c_char,
) -> c_int {
    if value.is_null() {
        return bind(stmt, slot, Value::Null);
    }
    let Ok(text) = CStr::from_ptr(value).to_str() else {
        return ErrorCode::Misuse as c_int;
    };
    bind(stmt, slot, Value::Text(text.to_string()))
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_bind_blob(
    stmt: *mut ZqStmt,
    slot: c_int,
    data: *const c_uchar,
    len: c_int,
) -> c_int {
    if data.is_null() || len < 0 {
        return ErrorCode::Misuse as c_int;
    }
    let bytes = std::slice::from_raw_parts(data, len as usize).to_vec();
    bind(stmt, slot, Value::Blob(bytes))
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_bind_null(stmt: *mut ZqStmt, slot: c_int) -> c_int {
    bind(stmt, slot, Value::Null)
}

/// Advance one row: ZQLITE_ROW when a row is available, ZQLITE_DONE at the
/// end, an error code otherwise.
#[no_mangle]
pub unsafe extern "C" fn zqlite_step(stmt: *mut ZqStmt) -> c_int {
    if stmt.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    let stmt = &mut *stmt;
    if stmt.conn.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    let conn = &mut *stmt.conn;
    stmt.text_cache.clear();
    match conn.conn.step(&mut stmt.stmt) {
        Ok(Some(row)) => {
            stmt.current = Some(row);
            ZQLITE_ROW
        }
        Ok(None) => {
            stmt.current = None;
            ZQLITE_DONE
        }
        Err(e) => {
            stmt.current = None;
            set_error(conn, &e)
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_column_count(stmt: *mut ZqStmt) -> c_int {
    if stmt.is_null() {
        return 0;
    }
    (*stmt).current.as_ref().map_or(0, |r| r.values.len() as c_int)
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_column_int(stmt: *mut ZqStmt, col: c_int) -> i64 {
    column_value(stmt, col).and_then(|v| v.as_i64()).unwrap_or(0)
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_column_real(stmt: *mut ZqStmt, col: c_int) -> c_double {
    column_value(stmt, col).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_column_text(stmt: *mut ZqStmt, col: c_int) -> *const c_char {
    if stmt.is_null() {
        return ptr::null();
    }
    let stmt = &mut *stmt;
    let Some(row) = &stmt.current else {
        return ptr::null();
    };
    let Some((_, value)) = row.values.get(col as usize) else {
        return ptr::null();
    };
    let rendered = value.to_string().replace('\0', " ");
    let Ok(cstring) = CString::new(rendered) else {
        return ptr::null();
    };
    stmt.text_cache.push(cstring);
    stmt.text_cache.last().expect("BUG: just pushed").as_ptr()
}

unsafe fn column_value(stmt: *mut ZqStmt, col: c_int) -> Option<Value> {
    if stmt.is_null() || col < 0 {
        return None;
    }
    (*stmt)
        .current
        .as_ref()
        .and_then(|r| r.values.get(col as usize))
        .map(|(_, v)| v.clone())
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_reset(stmt: *mut ZqStmt) -> c_int {
    if stmt.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    let stmt = &mut *stmt;
    stmt.current = None;
    match stmt.stmt.reset() {
        Ok(()) => ErrorCode::Ok as c_int,
        Err(e) => e.code() as c_int,
    }
}

/// Finalize and free the statement.
#[no_mangle]
pub unsafe extern "C" fn zqlite_free_statement(stmt: *mut ZqStmt) -> c_int {
    if stmt.is_null() {
        return ErrorCode::Misuse as c_int;
    }
    let mut boxed = Box::from_raw(stmt);
    boxed.stmt.finalize();
    drop(boxed);
    ErrorCode::Ok as c_int
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_last_insert_rowid(conn: *mut ZqConn) -> i64 {
    if conn.is_null() {
        return 0;
    }
    (*conn).conn.last_insert_rowid()
}

#[no_mangle]
pub unsafe extern "C" fn zqlite_changes(conn: *mut ZqConn) -> i64 {
    if conn.is_null() {
        return 0;
    }
    (*conn).conn.changes()
}
