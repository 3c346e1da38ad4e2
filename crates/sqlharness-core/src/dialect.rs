//! Target database dialects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The database family a configuration targets.
///
/// Fixtures use this to decide whether they apply; SQL generation differences
/// live with the drivers and the schema exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }

    /// Whether dropping a table cascades to dependent constraints.
    pub const fn supports_drop_cascade(self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            other => Err(crate::Error::config(format!("unknown dialect '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("SQLite".parse::<Dialect>().expect("sqlite"), Dialect::Sqlite);
        assert_eq!("postgresql".parse::<Dialect>().expect("pg"), Dialect::Postgres);
        assert_eq!("mariadb".parse::<Dialect>().expect("mysql"), Dialect::Mysql);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_display_round_trips_name() {
        assert_eq!(Dialect::Postgres.to_string(), "postgres");
        assert_eq!(Dialect::default(), Dialect::Sqlite);
    }
}
