//! SQLite connection implementation.
//!
//! This module provides a safe wrapper around SQLite's C API and implements
//! the `Connection` trait from sqlharness-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers
#![allow(clippy::if_not_else)] // Clearer for error handling

use crate::types;
use libsqlite3_sys as ffi;
use sqlharness_core::{
    Connection, ConnectionId, ConnectionState, Error, Result, Row, Value,
    error::{
        ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind, TransactionError,
        TransactionErrorKind,
    },
    row::ColumnInfo,
};
use std::ffi::{CStr, CString, c_int};
use std::fmt;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// libsqlite3-sys omits `sqlite3_close_v2` from its generated bindings, but the
// bundled amalgamation still exports it.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = ffi::SQLITE_OPEN_FULLMUTEX;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Inner state of the SQLite connection, protected by a mutex.
///
/// `db` is null once the connection has been closed.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is opened in serialized mode and every access goes
// through the surrounding Mutex.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    id: ConnectionId,
    inner: Mutex<SqliteInner>,
    path: String,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if !db.is_null() {
                // SAFETY: db is valid even on failure and must still be closed
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            } else {
                error_string(rc)
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database '{}': {}", config.path, msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        let id = ConnectionId::next();
        tracing::trace!(connection = %id, path = %config.path, "Opened SQLite connection");

        Ok(Self {
            id,
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the handle, failing if the connection has been closed.
    fn open_handle(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        let inner = self.lock();
        if inner.db.is_null() {
            return Err(Error::connection_closed(format!(
                "{} ({}) is closed",
                self.id, self.path
            )));
        }
        Ok(inner)
    }

    /// Execute SQL directly without binding (transaction control, pragmas).
    fn execute_raw(&self, inner: &SqliteInner, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc != ffi::SQLITE_OK {
            let msg = if !errmsg.is_null() {
                // SAFETY: errmsg was allocated by sqlite3_exec and is freed here
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            } else {
                error_string(rc)
            };

            return Err(Error::Query(QueryError {
                kind: error_code_to_kind(rc, &msg),
                sql: Some(sql.to_string()),
                message: msg,
                source: None,
            }));
        }

        Ok(())
    }

    /// Prepare and execute a query, returning all rows.
    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.open_handle()?;
        tracing::trace!(connection = %self.id, sql, "query");
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(inner.db, sql, params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let mut col_names = Vec::with_capacity(col_count as usize);
        for i in 0..col_count {
            // SAFETY: stmt is valid, i is in range
            let name = unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i));
            col_names.push(name);
        }
        let columns = Arc::new(ColumnInfo::new(col_names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(stmt.raw) };
            match rc {
                ffi::SQLITE_ROW => {
                    let mut values = Vec::with_capacity(col_count as usize);
                    for i in 0..col_count {
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        values.push(unsafe { types::read_column(stmt.raw, i) });
                    }
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(inner.db, sql)),
            }
        }

        Ok(rows)
    }

    /// Prepare and execute a statement, returning rows affected.
    ///
    /// Read-only statements report zero rows affected.
    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = self.open_handle()?;
        tracing::trace!(connection = %self.id, sql, "execute");
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(inner.db, sql, params)?;

        // SAFETY: stmt is valid
        let read_only = unsafe { ffi::sqlite3_stmt_readonly(stmt.raw) } != 0;

        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => continue,
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(inner.db, sql)),
            }
        }

        if read_only {
            return Ok(0);
        }
        // SAFETY: db is valid
        let changes = unsafe { ffi::sqlite3_changes(inner.db) };
        Ok(changes as u64)
    }

    fn transaction_error(kind: TransactionErrorKind, message: &str) -> Error {
        Error::Transaction(TransactionError {
            kind,
            message: message.to_string(),
        })
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection for SqliteConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        if self.lock().db.is_null() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.execute_sync(sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query_sync(sql, params)
    }

    fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    fn begin_internal(&self) -> Result<()> {
        let mut inner = self.open_handle()?;
        if inner.in_transaction {
            return Err(Self::transaction_error(
                TransactionErrorKind::AlreadyActive,
                "Already in a transaction",
            ));
        }
        self.execute_raw(&inner, "BEGIN IMMEDIATE")?;
        inner.in_transaction = true;
        tracing::trace!(connection = %self.id, "BEGIN");
        Ok(())
    }

    fn commit_internal(&self) -> Result<()> {
        let mut inner = self.open_handle()?;
        if !inner.in_transaction {
            return Err(Self::transaction_error(
                TransactionErrorKind::NotActive,
                "Not in a transaction",
            ));
        }
        self.execute_raw(&inner, "COMMIT")?;
        inner.in_transaction = false;
        tracing::trace!(connection = %self.id, "COMMIT");
        Ok(())
    }

    fn rollback_internal(&self) -> Result<()> {
        let mut inner = self.open_handle()?;
        if !inner.in_transaction {
            return Err(Self::transaction_error(
                TransactionErrorKind::NotActive,
                "Not in a transaction",
            ));
        }
        // A failed statement may already have ended the transaction.
        // SAFETY: db is valid
        if unsafe { ffi::sqlite3_get_autocommit(inner.db) } == 0 {
            self.execute_raw(&inner, "ROLLBACK")?;
        }
        inner.in_transaction = false;
        tracing::trace!(connection = %self.id, "ROLLBACK");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.open_handle()?;
        // SAFETY: db is valid; close_v2 defers the close until outstanding
        // statements are finalized, and none outlive a call on this type.
        let rc = unsafe { sqlite3_close_v2(inner.db) };
        if rc != ffi::SQLITE_OK {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("Failed to close {}: {}", self.id, error_string(rc)),
                source: None,
            }));
        }
        inner.db = ptr::null_mut();
        inner.in_transaction = false;
        tracing::trace!(connection = %self.id, "Closed SQLite connection");
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and never used again
            unsafe {
                sqlite3_close_v2(inner.db);
            }
        }
    }
}

/// A prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
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
        if raw.is_null() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: "empty statement".to_string(),
                source: None,
            }));
        }

        Ok(Self { raw })
    }

    fn bind_all(&self, db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: raw is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { errmsg(db) };
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(sql.to_string()),
                    message: format!("Failed to bind parameter {}: {}", i + 1, msg),
                    source: None,
                }));
            }
        }
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw is a valid statement finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

// Helper functions

/// # Safety
/// `db` must be a valid connection handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: guaranteed by the caller; errmsg never returns null for a valid db
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

fn error_string(rc: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
        .to_string_lossy()
        .into_owned()
}

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (errmsg(db), ffi::sqlite3_errcode(db)) };

    Error::Query(QueryError {
        kind: error_code_to_kind(code, &msg),
        sql: Some(sql.to_string()),
        message: msg,
        source: None,
    })
}

fn error_code_to_kind(code: c_int, message: &str) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_ERROR if message.starts_with("no such") => QueryErrorKind::NotFound,
        ffi::SQLITE_ERROR if message.contains("syntax error") => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlharness_core::{ConnectionRef, Transaction};

    fn memory() -> SqliteConnection {
        SqliteConnection::open_memory().expect("open in-memory database")
    }

    #[test]
    fn test_execute_and_query() {
        let conn = memory();
        conn.execute("CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .expect("create");
        let n = conn
            .execute(
                "INSERT INTO parent (id, name) VALUES (?, ?)",
                &[Value::BigInt(1), Value::Text("Bob".into())],
            )
            .expect("insert");
        assert_eq!(n, 1);

        let rows = conn.query("SELECT id, name FROM parent", &[]).expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id"), Some(&Value::BigInt(1)));
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("Bob".into())));
    }

    #[test]
    fn test_select_reports_zero_rows_affected() {
        let conn = memory();
        assert_eq!(conn.execute("SELECT 1", &[]).expect("select 1"), 0);
    }

    #[test]
    fn test_values_round_trip_through_storage_classes() {
        let conn = memory();
        let rows = conn
            .query(
                "SELECT ?, ?, ?, ?, ?",
                &[
                    Value::Null,
                    Value::Bool(true),
                    Value::Double(1.5),
                    Value::Text(String::new()),
                    Value::Bytes(vec![1, 2, 3]),
                ],
            )
            .expect("select");
        let values: Vec<&Value> = rows[0].values().collect();
        assert_eq!(values[0], &Value::Null);
        assert_eq!(values[1], &Value::BigInt(1));
        assert_eq!(values[2], &Value::Double(1.5));
        assert_eq!(values[3], &Value::Text(String::new()));
        assert_eq!(values[4], &Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn test_close_changes_state_and_rejects_use() {
        let conn = memory();
        assert_eq!(conn.state(), ConnectionState::Open);
        conn.close().expect("close");
        assert_eq!(conn.state(), ConnectionState::Closed);

        let err = conn.query("SELECT 1", &[]).expect_err("closed");
        assert!(err.is_closed_connection());
        let err = conn.close().expect_err("closed twice");
        assert!(err.is_closed_connection());
    }

    #[test]
    fn test_transaction_rollback_on_drop() {
        let conn: ConnectionRef = Arc::new(memory());
        conn.execute("CREATE TABLE t (v INTEGER)", &[]).expect("create");
        {
            let tx = Transaction::begin(&conn).expect("begin");
            tx.execute("INSERT INTO t VALUES (1)", &[]).expect("insert");
        }
        assert!(!conn.in_transaction());
        let rows = conn.query("SELECT COUNT(*) FROM t", &[]).expect("count");
        assert_eq!(rows[0].get(0), Some(&Value::BigInt(0)));
    }

    #[test]
    fn test_nested_begin_rejected() {
        let conn: ConnectionRef = Arc::new(memory());
        let tx = Transaction::begin(&conn).expect("begin");
        let err = conn.begin_internal().expect_err("nested");
        assert!(matches!(
            err,
            Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                ..
            })
        ));
        tx.commit().expect("commit");
    }

    #[test]
    fn test_error_kinds() {
        let conn = memory();
        let err = conn.query("SELECT * FROM missing", &[]).expect_err("missing table");
        assert!(matches!(
            err,
            Error::Query(QueryError {
                kind: QueryErrorKind::NotFound,
                ..
            })
        ));
        assert_eq!(err.sql(), Some("SELECT * FROM missing"));

        conn.execute("CREATE TABLE u (id INTEGER PRIMARY KEY)", &[]).expect("create");
        conn.execute("INSERT INTO u VALUES (1)", &[]).expect("insert");
        let err = conn.execute("INSERT INTO u VALUES (1)", &[]).expect_err("duplicate");
        assert!(matches!(
            err,
            Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                ..
            })
        ));
    }
}
