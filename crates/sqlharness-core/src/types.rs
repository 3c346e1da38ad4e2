//! SQL type definitions for mapped properties.

use serde::{Deserialize, Serialize};

/// SQL data types a mapped property can declare.
///
/// In mapping documents these are written in snake case, e.g. `"big_int"`,
/// `"text"` or `{"var_char": 64}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Integer,
    BigInt,
    Real,
    Double,
    Boolean,
    VarChar(u32),
    Text,
    /// Large binary object; entities carrying one are never cached.
    Blob,
    Date,
    Timestamp,
    Guid,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Guid => "CHAR(36)".to_string(),
        }
    }

    /// Check if this type holds a large binary value.
    pub const fn is_large_binary(&self) -> bool {
        matches!(self, SqlType::Blob)
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Integer | SqlType::BigInt | SqlType::Real | SqlType::Double
        )
    }
}
