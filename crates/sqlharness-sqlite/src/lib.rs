//! SQLite driver for SQLHarness.
//!
// FFI calls into libsqlite3 require unsafe code
#![allow(unsafe_code)]
//!
//! This crate provides a synchronous SQLite driver on top of `libsqlite3-sys`
//! (bundled). It implements the `Connection` and `Driver` traits from
//! sqlharness-core so fixtures can run against a real database file.
//!
//! # Features
//!
//! - Blocking `execute`/`query` with positional `?` parameters
//! - Explicit `close()` with an observable open/closed state
//! - Transactions through `sqlharness_core::Transaction`
//! - Configurable open flags and busy timeout
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlharness_core::{Connection, Value};
//! use sqlharness_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_file("/tmp/harness.db")?;
//! conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])?;
//! conn.execute("INSERT INTO users (name) VALUES (?)", &[Value::Text("Alice".into())])?;
//! conn.close()?;
//! ```
//!
//! # Connection strings
//!
//! `SqliteDriver` accepts a plain file path, `sqlite://<path>`, or
//! `:memory:`. Every in-memory connection is a separate database, so fixtures
//! that share a schema across connections must use a file.

pub mod connection;
pub mod driver;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};
pub use driver::SqliteDriver;

/// The SQLite library version.
pub fn sqlite_version() -> String {
    // SAFETY: sqlite3_libversion returns a pointer to a static C string
    unsafe { std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_string_lossy()
        .into_owned()
}
