//! The SQLite [`Driver`].

use crate::connection::{SqliteConfig, SqliteConnection};
use sqlharness_core::{ConnectionRef, Dialect, Driver, Result};
use std::sync::Arc;

/// Opens [`SqliteConnection`]s from connection strings.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    busy_timeout_ms: u32,
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self {
            busy_timeout_ms: SqliteConfig::default().busy_timeout_ms,
        }
    }
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the busy timeout applied to every connection.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Turn a connection string into an open configuration.
    ///
    /// Accepts `sqlite://<path>`, `sqlite:<path>` or a bare path.
    pub fn config_for(&self, connection_string: &str) -> SqliteConfig {
        let path = connection_string
            .strip_prefix("sqlite://")
            .or_else(|| connection_string.strip_prefix("sqlite:"))
            .unwrap_or(connection_string);
        SqliteConfig::file(path).busy_timeout(self.busy_timeout_ms)
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self, connection_string: &str) -> Result<ConnectionRef> {
        let conn = SqliteConnection::open(&self.config_for(connection_string))?;
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_forms() {
        let driver = SqliteDriver::new();
        assert_eq!(driver.config_for("sqlite:///tmp/a.db").path, "/tmp/a.db");
        assert_eq!(driver.config_for("sqlite:b.db").path, "b.db");
        assert_eq!(driver.config_for("c.db").path, "c.db");
        assert_eq!(driver.config_for(":memory:").path, ":memory:");
        assert_eq!(driver.busy_timeout(10).config_for("x").busy_timeout_ms, 10);
    }
}
