//! Fixture lifecycle and resource-leak detection for database-backed
//! integration tests.
//!
//! A fixture groups tests that share one schema and one session factory.
//! [`TestCase`] builds the configuration, creates the schema, builds the
//! factory over a [`ConnectionTracker`] and then, after every test, checks
//! three things:
//!
//! - the last session the test opened is closed
//! - the database holds no rows of any mapped entity
//! - no connection handed out by the tracker is still open
//!
//! A failed check fails the test with a [`LeakReport`] and is repaired
//! (session force-closed, schema recreated, connections released) so the
//! next test starts clean.
//!
//! # Example
//!
//! ```no_run
//! use sqlharness::prelude::*;
//! use std::sync::Arc;
//!
//! struct People;
//!
//! impl TestFixture for People {
//!     fn mappings(&self) -> Vec<String> {
//!         vec!["people.json".to_string()]
//!     }
//!
//!     fn mapping_source(&self) -> Option<Arc<dyn MappingSource>> {
//!         Some(Arc::new(DirectoryMappingSource::new("tests/mappings")))
//!     }
//! }
//!
//! let report = FixtureRunner::new(People)
//!     .test("insert and clean up", |_, ctx| {
//!         let session = ctx.open_session()?;
//!         session.save("Person", &[("id", Value::BigInt(1)), ("name", "Ann".into())])?;
//!         session.delete_all()?;
//!         session.close()
//!     })
//!     .run();
//! report.assert_success();
//! ```

pub mod bug;
pub mod case;
pub mod context;
pub mod fixture;
pub mod logging;
pub mod outcome;
pub mod runner;
pub mod settings;
pub mod tracker;

pub use bug::{bug_mapping_resource, bug_number_from_module};
pub use case::{FixtureState, SetUpOutcome, TestCase};
pub use context::TestContext;
pub use fixture::TestFixture;
pub use logging::init_logging;
pub use outcome::{LeakReport, TestFailure, TestOutcome};
pub use runner::{FixtureReport, FixtureRunner};
pub use settings::TestSettings;
pub use tracker::ConnectionTracker;

/// Prelude for fixture authors.
///
/// ```ignore
/// use sqlharness::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ConnectionTracker, FixtureReport, FixtureRunner, FixtureState, LeakReport, SetUpOutcome,
        TestCase, TestContext, TestFailure, TestFixture, TestOutcome, TestSettings, bug_mappings,
        init_logging,
    };
    pub use sqlharness_core::{
        CacheConcurrencyStrategy, Configuration, ConfigurationBuilder, Connection,
        ConnectionProvider, Dialect, DirectoryMappingSource, Error, MappingSource, Result, Row,
        StaticMappingSource, Transaction, Value,
    };
    pub use sqlharness_session::{Interceptor, Session, SessionFactory};
}
