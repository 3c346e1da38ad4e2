//! Connection tracking.
//!
//! [`ConnectionTracker`] sits between a session factory and the real
//! connection provider. Every connection handed out is remembered until it is
//! given back, so that after a test the harness can tell whether anything is
//! still holding a physical connection open.

use sqlharness_core::{ConnectionId, ConnectionProvider, ConnectionRef, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A [`ConnectionProvider`] that records the connections it hands out.
pub struct ConnectionTracker {
    inner: Arc<dyn ConnectionProvider>,
    connections: Mutex<HashMap<ConnectionId, ConnectionRef>>,
}

impl fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("connection_string", &self.inner.connection_string())
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

impl ConnectionTracker {
    /// Track connections acquired from `inner`.
    pub fn new(inner: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            inner,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The provider connections are really acquired from.
    pub fn inner(&self) -> &Arc<dyn ConnectionProvider> {
        &self.inner
    }

    /// Number of connections handed out and not yet given back or observed
    /// closed.
    pub fn tracked_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether any tracked connection is still open.
    ///
    /// A tracked connection that was closed some other way, for instance by
    /// its session being dropped, does not count and is forgotten here.
    pub fn has_open_connections(&self) -> bool {
        let mut connections = self.lock();
        connections.retain(|id, c| {
            let open = c.is_open();
            if !open {
                tracing::trace!(connection = %id, "Forgetting connection closed elsewhere");
            }
            open
        });
        !connections.is_empty()
    }

    /// Ids of the tracked connections that are still open.
    pub fn open_connections(&self) -> Vec<ConnectionId> {
        let mut ids = self
            .lock()
            .values()
            .filter(|c| c.is_open())
            .map(|c| c.id())
            .collect::<Vec<_>>();
        ids.sort_by_key(|id| id.get());
        ids
    }

    /// Give back every tracked connection.
    ///
    /// Release errors are logged and otherwise ignored. The set may shrink
    /// under us while a release runs.
    pub fn close_all(&self) {
        loop {
            let next = self.lock().values().next().cloned();
            let Some(conn) = next else {
                break;
            };
            tracing::debug!(connection = %conn.id(), "Releasing tracked connection");
            if let Err(e) = self.close_connection(&conn) {
                tracing::warn!(connection = %conn.id(), error = %e, "Releasing tracked connection failed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionRef>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionProvider for ConnectionTracker {
    fn connection_string(&self) -> &str {
        self.inner.connection_string()
    }

    fn get_connection(&self) -> Result<ConnectionRef> {
        match self.inner.get_connection() {
            Ok(conn) => {
                tracing::trace!(connection = %conn.id(), "Tracking connection");
                self.lock().insert(conn.id(), Arc::clone(&conn));
                Ok(conn)
            }
            Err(e) => Err(Error::could_not_open(self.inner.connection_string(), e)),
        }
    }

    /// Release through the real provider, then forget the connection whatever
    /// the outcome. Releasing a connection that is already closed succeeds.
    fn close_connection(&self, conn: &ConnectionRef) -> Result<()> {
        let result = self.inner.close_connection(conn);
        self.lock().remove(&conn.id());
        match result {
            Err(e) if e.is_closed_connection() => {
                tracing::trace!(connection = %conn.id(), "Released connection was already closed");
                Ok(())
            }
            other => other,
        }
    }
}
