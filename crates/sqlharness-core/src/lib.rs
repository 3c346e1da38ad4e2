//! Core types and traits for SQLHarness.
//!
//! This crate provides the abstractions the fixture harness and its
//! collaborators share:
//!
//! - `Connection` trait for physical database connections, with an
//!   observable open/closed state
//! - `Driver` and `ConnectionProvider` traits for acquiring connections
//! - Mapping documents and the `MappingSource` they are loaded from
//! - `ConfigurationBuilder` / `Configuration` for fixture setup
//! - The shared `Error` type

pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod identifiers;
pub mod mapping;
pub mod provider;
pub mod row;
pub mod types;
pub mod value;

pub use config::{
    CacheConcurrencyStrategy, ClassMapping, CollectionBinding, Configuration,
    ConfigurationBuilder,
};
pub use connection::{Connection, ConnectionId, ConnectionRef, ConnectionState, Transaction};
pub use dialect::Dialect;
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, MappingError, MappingErrorKind,
    QueryError, QueryErrorKind, Result, SchemaError, SchemaErrorKind, TransactionError,
    TransactionErrorKind,
};
pub use identifiers::{is_valid_identifier, quote_ident};
pub use mapping::{
    CollectionMapping, DirectoryMappingSource, EntityMapping, IdMapping, MappingDocument,
    MappingSource, PropertyMapping, StaticMappingSource,
};
pub use provider::{ConnectionProvider, Driver, DriverConnectionProvider};
pub use row::{ColumnInfo, Row};
pub use types::SqlType;
pub use value::Value;
