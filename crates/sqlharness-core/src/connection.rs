//! Database connection traits.
//!
//! This module defines the core abstractions for physical connections:
//!
//! - [`Connection`] - Executing statements, transaction control, and an
//!   observable open/closed state
//! - [`Transaction`] - A scoped transaction that rolls back unless committed
//! - [`ConnectionState`] - What the leak detector inspects
//!
//! All operations are synchronous and block the caller.

use crate::error::{Error, Result, TransactionError, TransactionErrorKind};
use crate::row::Row;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id.
    ///
    /// Drivers call this once per physical connection they open.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Observable state of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// A physical database connection.
///
/// Implementations use interior synchronization so a connection can be shared
/// as a [`ConnectionRef`] between the session that uses it and the provider
/// that tracks it. A connection may be closed by whoever holds a handle; every
/// other holder observes the change through [`state`](Connection::state).
pub trait Connection: Send + Sync + fmt::Debug {
    /// Identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Current open/closed state.
    fn state(&self) -> ConnectionState;

    /// Check whether the connection is still open.
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Execute a statement and return the number of rows affected.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Whether a transaction is currently active.
    fn in_transaction(&self) -> bool;

    /// Start a transaction. Prefer [`Transaction::begin`].
    fn begin_internal(&self) -> Result<()>;

    /// Commit the active transaction.
    fn commit_internal(&self) -> Result<()>;

    /// Roll back the active transaction.
    fn rollback_internal(&self) -> Result<()>;

    /// Close the connection.
    ///
    /// Closing an already-closed connection returns a `Closed` connection error.
    fn close(&self) -> Result<()>;
}

/// Shared handle to a physical connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// A database transaction.
///
/// Transactions must be explicitly committed or rolled back; dropping an
/// unfinished transaction rolls it back. The transaction holds its own
/// handle to the connection it runs on.
pub struct Transaction {
    conn: ConnectionRef,
    finalized: bool,
}

impl Transaction {
    /// Begin a transaction on `conn`.
    pub fn begin(conn: &ConnectionRef) -> Result<Self> {
        conn.begin_internal()?;
        Ok(Self {
            conn: Arc::clone(conn),
            finalized: false,
        })
    }

    /// The connection this transaction runs on.
    pub fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    /// Identity of the connection this transaction runs on.
    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Check if this transaction has been committed or rolled back.
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Execute a statement within this transaction.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_active()?;
        self.conn.execute(sql, params)
    }

    /// Execute a query within this transaction.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_active()?;
        self.conn.query(sql, params)
    }

    /// Commit the transaction, making all changes permanent.
    pub fn commit(mut self) -> Result<()> {
        self.finalized = true;
        self.conn.commit_internal()
    }

    /// Roll back the transaction, discarding all changes.
    pub fn rollback(mut self) -> Result<()> {
        self.finalized = true;
        self.conn.rollback_internal()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.conn.in_transaction() {
            Ok(())
        } else {
            Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: format!("no active transaction on {}", self.conn.id()),
            }))
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("connection", &self.conn.id())
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finalized && self.conn.is_open() && self.conn.in_transaction() {
            if let Err(e) = self.conn.rollback_internal() {
                tracing::warn!(connection = %self.conn.id(), error = %e, "Rollback on drop failed");
            }
        }
    }
}
