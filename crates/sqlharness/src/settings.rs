//! Harness-wide database settings.
//!
//! Settings are looked up in this order:
//!
//! 1. the JSON file named by `SQLHARNESS_CONFIG`
//! 2. `sqlharness.json` in the current directory
//! 3. a SQLite file in the system temp directory, one per process

use serde::{Deserialize, Serialize};
use sqlharness_core::{
    ConfigError, ConfigurationBuilder, Dialect, Driver, DriverConnectionProvider, Error, Result,
};
use sqlharness_sqlite::SqliteDriver;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Environment variable naming a settings file.
pub const CONFIG_ENV: &str = "SQLHARNESS_CONFIG";

/// Settings file looked for in the current directory.
pub const DEFAULT_FILE: &str = "sqlharness.json";

/// Which database fixtures run against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestSettings {
    /// Driver name. Only `sqlite` is built in.
    pub driver: String,
    /// Overrides the driver's dialect.
    pub dialect: Option<Dialect>,
    pub connection_string: String,
    /// Free-form configuration properties.
    pub properties: BTreeMap<String, String>,
}

impl Default for TestSettings {
    fn default() -> Self {
        let file = std::env::temp_dir().join(format!("sqlharness-{}.db", std::process::id()));
        Self::sqlite(file)
    }
}

impl TestSettings {
    /// Settings for a SQLite database file.
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            driver: "sqlite".to_string(),
            dialect: None,
            connection_string: format!("sqlite://{}", path.as_ref().display()),
            properties: BTreeMap::new(),
        }
    }

    /// Load settings using the lookup order above.
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(path);
        }
        let local = Path::new(DEFAULT_FILE);
        if local.is_file() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    /// Read settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("could not read settings from '{}'", path.display()),
                source: Some(Box::new(e)),
            })
        })?;
        tracing::debug!(path = %path.display(), "Loaded harness settings");
        Self::from_json(&content)
    }

    /// Parse settings from JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid harness settings: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    /// The driver these settings name.
    pub fn driver(&self) -> Result<Arc<dyn Driver>> {
        match self.driver.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Arc::new(SqliteDriver::new())),
            other => Err(Error::config(format!("unsupported driver '{other}'"))),
        }
    }

    /// Copy the settings onto a configuration builder.
    pub fn apply(&self, builder: &mut ConfigurationBuilder) -> Result<()> {
        builder
            .connection_string(self.connection_string.clone())
            .driver(self.driver()?);
        if let Some(dialect) = self.dialect {
            builder.dialect(dialect);
        }
        for (key, value) in &self.properties {
            builder.property(key.clone(), value.clone());
        }
        Ok(())
    }

    /// A provider that opens connections straight from the driver.
    pub fn connection_provider(&self) -> Result<DriverConnectionProvider> {
        Ok(DriverConnectionProvider::new(
            self.driver()?,
            self.connection_string.clone(),
        ))
    }
}
