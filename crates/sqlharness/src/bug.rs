//! Naming conventions for bug-regression fixtures.
//!
//! A regression fixture lives in a module named after the issue it covers
//! (`tests::issues::nh3841`) and loads its mappings from
//! `issues.<BUG>.mappings.json`, which [`DirectoryMappingSource`] resolves to
//! `issues/<BUG>/mappings.json`.
//!
//! [`DirectoryMappingSource`]: sqlharness_core::DirectoryMappingSource

/// Mapping resource name for a bug fixture.
pub fn bug_mapping_resource(bug: &str) -> String {
    format!("issues.{bug}.mappings.json")
}

/// The bug number a module is named after: its last path segment,
/// uppercased.
pub fn bug_number_from_module(module_path: &str) -> String {
    module_path
        .rsplit("::")
        .next()
        .unwrap_or(module_path)
        .to_ascii_uppercase()
}

/// Mapping resources for the bug fixture defined in the calling module.
///
/// ```
/// mod nh1234 {
///     pub fn mappings() -> Vec<String> {
///         sqlharness::bug_mappings!()
///     }
/// }
/// assert_eq!(nh1234::mappings(), vec!["issues.NH1234.mappings.json"]);
/// ```
#[macro_export]
macro_rules! bug_mappings {
    () => {
        vec![$crate::bug_mapping_resource(
            &$crate::bug_number_from_module(module_path!()),
        )]
    };
}
