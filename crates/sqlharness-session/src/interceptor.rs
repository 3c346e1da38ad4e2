//! Statement interception.

use std::fmt;

/// Hook applied to every statement a session runs.
pub trait Interceptor: Send + Sync + fmt::Debug {
    /// Inspect or rewrite `sql` before it is prepared.
    fn on_prepare_statement(&self, sql: &str) -> String {
        sql.to_string()
    }
}
