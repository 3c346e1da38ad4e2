//! Schema export for SQLHarness.
//!
//! This crate provides:
//! - DDL generation from resolved class and collection mappings
//! - `SchemaExport` to create and drop a configuration's schema
//! - `SchemaGuard`, a scoped handle that drops the schema unless kept

pub mod ddl;
pub mod export;
pub mod guard;

pub use ddl::{collection_table_ddl, column_type, drop_table_ddl, entity_table_ddl};
pub use export::SchemaExport;
pub use guard::SchemaGuard;
