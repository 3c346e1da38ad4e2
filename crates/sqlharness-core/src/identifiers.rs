//! SQL identifier quoting and validation.

use regex::Regex;
use std::sync::OnceLock;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use sqlharness_core::quote_ident;
///
/// assert_eq!(quote_ident("parent"), "\"parent\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$") {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid identifier pattern, rejecting all names");
                None
            }
        })
        .as_ref()
}

/// Check that a mapped name is a plain SQL identifier.
///
/// Mapping documents only accept plain identifiers for tables, columns and
/// entity names.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}
