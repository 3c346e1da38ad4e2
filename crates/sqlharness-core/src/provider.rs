//! Drivers and connection providers.
//!
//! A [`Driver`] knows how to open a physical connection for a connection
//! string. A [`ConnectionProvider`] is what sessions and schema exports ask
//! for connections; it decides how connections are handed out and how they
//! are given back.

use crate::connection::ConnectionRef;
use crate::dialect::Dialect;
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Opens physical connections for one database family.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Short driver name as used in settings files (e.g. `"sqlite"`).
    fn name(&self) -> &'static str;

    /// The dialect connections opened by this driver speak.
    fn dialect(&self) -> Dialect;

    /// Open a new physical connection.
    fn connect(&self, connection_string: &str) -> Result<ConnectionRef>;
}

/// Hands out and takes back physical connections.
pub trait ConnectionProvider: Send + Sync + fmt::Debug {
    /// The connection string connections are opened against.
    fn connection_string(&self) -> &str;

    /// Acquire a connection.
    fn get_connection(&self) -> Result<ConnectionRef>;

    /// Give a connection back.
    fn close_connection(&self, conn: &ConnectionRef) -> Result<()>;
}

/// The plain provider: every acquisition opens a fresh connection through the
/// driver and every release closes it.
#[derive(Debug, Clone)]
pub struct DriverConnectionProvider {
    driver: Arc<dyn Driver>,
    connection_string: String,
}

impl DriverConnectionProvider {
    /// Create a provider for `connection_string` using `driver`.
    pub fn new(driver: Arc<dyn Driver>, connection_string: impl Into<String>) -> Self {
        Self {
            driver,
            connection_string: connection_string.into(),
        }
    }

    /// The underlying driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl ConnectionProvider for DriverConnectionProvider {
    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn get_connection(&self) -> Result<ConnectionRef> {
        let conn = self.driver.connect(&self.connection_string)?;
        tracing::trace!(connection = %conn.id(), driver = self.driver.name(), "Opened connection");
        Ok(conn)
    }

    fn close_connection(&self, conn: &ConnectionRef) -> Result<()> {
        tracing::trace!(connection = %conn.id(), "Closing connection");
        conn.close()
    }
}
