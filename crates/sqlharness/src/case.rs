//! The fixture lifecycle.
//!
//! A [`TestCase`] owns one fixture and drives it through
//!
//! ```text
//! Uninitialized -> Configuring -> SchemaReady -> FactoryReady
//!     -> Running (once per test) -> SchemaDropped -> Closed
//! ```
//!
//! After every test it checks that the last opened session was closed, that
//! the database is empty and that no tracked connection is still open. Each
//! failed check is repaired before the next test runs.

use crate::context::TestContext;
use crate::fixture::TestFixture;
use crate::logging::init_logging;
use crate::outcome::{LeakReport, TestFailure, TestOutcome};
use crate::tracker::ConnectionTracker;
use sqlharness_core::{
    CacheConcurrencyStrategy, Configuration, ConfigurationBuilder, Error, Result,
};
use sqlharness_schema::{SchemaExport, SchemaGuard};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Where a [`TestCase`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Uninitialized,
    Configuring,
    SchemaReady,
    FactoryReady,
    Running,
    SchemaDropped,
    Closed,
}

/// Result of [`TestCase::fixture_set_up`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetUpOutcome {
    Ready,
    /// The fixture does not apply to the configured database.
    Skipped(String),
}

/// Drives one fixture through its lifecycle.
pub struct TestCase<F: TestFixture> {
    fixture: F,
    context: TestContext,
    schema: Option<SchemaGuard>,
    state: FixtureState,
}

impl<F: TestFixture> fmt::Debug for TestCase<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("fixture", &self.fixture.name())
            .field("state", &self.state)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<F: TestFixture> TestCase<F> {
    pub fn new(fixture: F) -> Self {
        let context = TestContext::new(fixture.name());
        Self {
            fixture,
            context,
            schema: None,
            state: FixtureState::Uninitialized,
        }
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    pub fn fixture(&self) -> &F {
        &self.fixture
    }

    pub fn fixture_mut(&mut self) -> &mut F {
        &mut self.fixture
    }

    pub fn context(&self) -> &TestContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TestContext {
        &mut self.context
    }

    /// Configure, create the schema and build the session factory.
    ///
    /// On error or skip everything built so far is torn down and the case
    /// ends up `Closed`; calling this again starts over.
    pub fn fixture_set_up(&mut self) -> Result<SetUpOutcome> {
        init_logging();
        if !matches!(self.state, FixtureState::Uninitialized | FixtureState::Closed) {
            return Err(Error::Custom(format!(
                "fixture '{}' is already set up ({:?})",
                self.context.fixture_name(),
                self.state
            )));
        }

        self.state = FixtureState::Configuring;
        match self.try_set_up() {
            Ok(SetUpOutcome::Ready) => {
                tracing::debug!(fixture = self.context.fixture_name(), "Fixture ready");
                Ok(SetUpOutcome::Ready)
            }
            Ok(SetUpOutcome::Skipped(reason)) => {
                tracing::info!(fixture = self.context.fixture_name(), reason = %reason, "Fixture skipped");
                self.cleanup();
                Ok(SetUpOutcome::Skipped(reason))
            }
            Err(e) => {
                tracing::error!(
                    fixture = self.context.fixture_name(),
                    connection_string = self.context.config.as_ref().map(|c| c.connection_string()),
                    error = %e,
                    "Error while setting up the fixture"
                );
                self.cleanup();
                Err(e)
            }
        }
    }

    fn try_set_up(&mut self) -> Result<SetUpOutcome> {
        let config = Arc::new(self.build_configuration()?);
        self.context.config = Some(Arc::clone(&config));

        let dialect = config.dialect();
        if !self.fixture.applies_to_dialect(dialect) {
            return Ok(SetUpOutcome::Skipped(format!(
                "does not apply to dialect {dialect}"
            )));
        }

        let tracker = Arc::new(ConnectionTracker::new(Arc::new(
            config.connection_provider()?,
        )));
        self.context.tracker = Some(Arc::clone(&tracker));

        let export = SchemaExport::new(Arc::clone(&config), tracker.clone());
        self.schema = Some(self.fixture.create_schema(export)?);
        self.state = FixtureState::SchemaReady;

        let factory = self.fixture.build_session_factory(config, tracker)?;
        self.context.factory = Some(factory.clone());
        self.state = FixtureState::FactoryReady;

        if !self.fixture.applies_to_factory(&factory) {
            return Ok(SetUpOutcome::Skipped(
                "does not apply to the session factory".to_string(),
            ));
        }
        Ok(SetUpOutcome::Ready)
    }

    fn build_configuration(&self) -> Result<Configuration> {
        let mut builder = ConfigurationBuilder::new();
        self.fixture.settings()?.apply(&mut builder)?;
        if let Some(source) = self.fixture.mapping_source() {
            builder.mapping_source(source);
        }
        for resource in self.fixture.mappings() {
            builder.add_resource(&resource)?;
        }
        self.fixture.configure(&mut builder)?;
        if let Some(strategy) = self.fixture.cache_concurrency_strategy() {
            apply_cache_strategy(&mut builder, strategy)?;
        }
        builder.build()
    }

    /// Drop the schema and release everything the fixture holds.
    ///
    /// Does nothing if the fixture was never set up or does not apply to
    /// the configured dialect.
    pub fn fixture_tear_down(&mut self) -> Result<()> {
        let Some(config) = self.context.config.clone() else {
            return Ok(());
        };
        if !self.fixture.applies_to_dialect(config.dialect()) {
            return Ok(());
        }

        let dropped = match self.schema.take() {
            Some(guard) => guard.drop_now(),
            None => Ok(()),
        };
        self.state = FixtureState::SchemaDropped;
        if let Err(e) = &dropped {
            tracing::error!(fixture = self.context.fixture_name(), error = %e, "Dropping the schema failed");
        }
        self.cleanup();
        dropped
    }

    /// Close the factory, release tracked connections and reset to `Closed`.
    fn cleanup(&mut self) {
        drop(self.schema.take());
        if let Some(factory) = self.context.factory.take() {
            factory.close();
        }
        if let Some(tracker) = self.context.tracker.take() {
            tracker.close_all();
        }
        self.context.config = None;
        self.context.last_session = Default::default();
        self.context.current_test = None;
        self.state = FixtureState::Closed;
        tracing::debug!(fixture = self.context.fixture_name(), "Fixture closed");
    }

    /// Start a test: runs the fixture's `on_set_up` hook.
    pub fn set_up(&mut self, test: &str) -> Result<()> {
        if self.state != FixtureState::FactoryReady {
            return Err(Error::Custom(format!(
                "fixture '{}' is not ready to run '{test}' ({:?})",
                self.context.fixture_name(),
                self.state
            )));
        }
        self.state = FixtureState::Running;
        self.context.current_test = Some(test.to_string());
        self.context.last_session = Default::default();
        tracing::debug!(fixture = self.context.fixture_name(), test, "Test starting");
        self.fixture.on_set_up(&mut self.context)
    }

    /// Finish a test: runs the fixture's `on_tear_down` hook, then the three
    /// leak checks.
    ///
    /// All checks run even when the hook fails. A hook error takes precedence
    /// over a leak in the returned failure.
    pub fn tear_down(&mut self) -> std::result::Result<(), TestFailure> {
        if self.state != FixtureState::Running {
            return Err(TestFailure::Error(Error::Custom(format!(
                "fixture '{}' has no running test ({:?})",
                self.context.fixture_name(),
                self.state
            ))));
        }

        let hook = self.fixture.on_tear_down(&mut self.context);
        let report = LeakReport {
            session_closed: self.check_session_is_closed(),
            database_cleaned: self.check_database_was_cleaned(),
            connections_closed: self.check_connections_are_closed(),
        };

        if !report.is_clean() {
            tracing::error!(
                fixture = self.context.fixture_name(),
                test = self.context.current_test(),
                leaked = ?report.leaked(),
                "{report}"
            );
        }
        self.context.current_test = None;
        self.state = FixtureState::FactoryReady;

        match hook {
            Err(e) => Err(TestFailure::Error(e).with_leaks(report)),
            Ok(()) if report.is_clean() => Ok(()),
            Ok(()) => Err(TestFailure::Leaked(report)),
        }
    }

    /// Run one test body between [`set_up`](Self::set_up) and
    /// [`tear_down`](Self::tear_down).
    ///
    /// A panicking body fails the test; teardown and the leak checks still
    /// run.
    pub fn run_test<B>(&mut self, name: &str, body: B) -> TestOutcome
    where
        B: FnOnce(&mut F, &mut TestContext) -> Result<()>,
    {
        let body_result = match self.set_up(name) {
            Ok(()) => {
                let fixture = &mut self.fixture;
                let context = &mut self.context;
                catch_unwind(AssertUnwindSafe(|| body(fixture, context)))
                    .unwrap_or_else(|payload| Err(panic_error(name, &*payload)))
            }
            Err(e) if self.state == FixtureState::Running => Err(e),
            Err(e) => return TestOutcome::Failed(TestFailure::Error(e)),
        };

        let torn_down = self.tear_down();
        match (body_result, torn_down) {
            (Ok(()), Ok(())) => TestOutcome::Passed,
            (Err(e), torn_down) => {
                tracing::error!(fixture = self.context.fixture_name(), test = name, error = %e, "Test failed");
                let mut failure = TestFailure::Error(e);
                if let Err(teardown) = torn_down {
                    if let Some(hook_error) = teardown.error() {
                        tracing::error!(fixture = self.context.fixture_name(), test = name, error = %hook_error, "Tear-down failed after the test failed");
                    }
                    if let Some(report) = teardown.leak_report() {
                        failure = failure.with_leaks(*report);
                    }
                }
                TestOutcome::Failed(failure)
            }
            (Ok(()), Err(failure)) => TestOutcome::Failed(failure),
        }
    }

    fn check_session_is_closed(&self) -> bool {
        let Some(session) = self.context.last_session.upgrade() else {
            return true;
        };
        if !session.is_open() {
            return true;
        }
        tracing::error!(
            fixture = self.context.fixture_name(),
            test = self.context.current_test(),
            session = %session.id(),
            "Test case didn't close a session, closing"
        );
        if let Err(e) = session.close() {
            tracing::warn!(session = %session.id(), error = %e, "Force-closing the session failed");
        }
        false
    }

    fn check_database_was_cleaned(&self) -> bool {
        let Some(factory) = self.context.factory.as_ref() else {
            return true;
        };
        if factory.all_class_metadata().is_empty() {
            return true;
        }

        let leftovers = factory.open_session().and_then(|session| {
            let rows = session.query_all_entities();
            let closed = session.close();
            let rows = rows?;
            closed?;
            Ok(rows)
        });
        match leftovers {
            Ok(rows) if rows.is_empty() => return true,
            Ok(rows) => {
                let entities = rows
                    .iter()
                    .map(|(entity, _)| entity.as_str())
                    .collect::<std::collections::BTreeSet<_>>();
                tracing::error!(
                    fixture = self.context.fixture_name(),
                    test = self.context.current_test(),
                    rows = rows.len(),
                    entities = ?entities,
                    "Test case didn't clean up the database after itself, re-creating the schema"
                );
            }
            Err(e) => {
                tracing::error!(
                    fixture = self.context.fixture_name(),
                    test = self.context.current_test(),
                    error = %e,
                    "Could not check the database was cleaned"
                );
            }
        }
        self.recreate_schema();
        false
    }

    fn recreate_schema(&self) {
        let Some(export) = self.schema.as_ref().map(SchemaGuard::export) else {
            return;
        };
        tracing::debug!(fixture = self.context.fixture_name(), "Recreating the schema");
        let recreated = export
            .drop(false, true)
            .and_then(|()| export.create(false, true));
        if let Err(e) = recreated {
            tracing::error!(fixture = self.context.fixture_name(), error = %e, "Recreating the schema failed");
        }
    }

    fn check_connections_are_closed(&self) -> bool {
        let Some(tracker) = self.context.tracker.as_ref() else {
            return true;
        };
        if !tracker.has_open_connections() {
            return true;
        }
        tracing::error!(
            fixture = self.context.fixture_name(),
            test = self.context.current_test(),
            open = ?tracker.open_connections(),
            "Test case didn't close all open connections, closing"
        );
        tracker.close_all();
        false
    }
}

impl<F: TestFixture> Drop for TestCase<F> {
    fn drop(&mut self) {
        if !matches!(self.state, FixtureState::Uninitialized | FixtureState::Closed) {
            tracing::debug!(fixture = self.context.fixture_name(), state = ?self.state, "Fixture dropped while set up");
            self.cleanup();
        }
    }
}

fn apply_cache_strategy(
    builder: &mut ConfigurationBuilder,
    strategy: CacheConcurrencyStrategy,
) -> Result<()> {
    for class in builder.class_mappings()? {
        if !class.is_inherited() && !class.has_large_binary_property() {
            builder.set_cache_concurrency_strategy(&class.entity_name, strategy)?;
        }
    }
    for collection in builder.collection_mappings()? {
        builder.set_collection_cache_concurrency_strategy(&collection.role, strategy)?;
    }
    Ok(())
}

fn panic_error(test: &str, payload: &(dyn Any + Send)) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    Error::Custom(format!("test '{test}' panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TestSettings;
    use sqlharness_core::{Dialect, MappingDocument, StaticMappingSource};
    use std::sync::Arc;

    const MAPPINGS: &str = r#"{
        "entities": [
            {
                "name": "Blob",
                "id": { "single": { "name": "id", "type": "big_int" } },
                "properties": [ { "name": "data", "type": "blob" } ]
            },
            {
                "name": "Owner",
                "id": { "single": { "name": "id", "type": "big_int" } },
                "collections": [ { "name": "tags", "element": { "name": "tag", "type": "text" } } ]
            },
            {
                "name": "SubOwner",
                "extends": "Owner"
            }
        ]
    }"#;

    #[test]
    fn test_cache_strategy_skips_subclasses_and_large_binaries() {
        let mut builder = ConfigurationBuilder::new();
        builder
            .connection_string("sqlite:///tmp/unused.db")
            .add_document("m.json", MappingDocument::parse("m.json", MAPPINGS).unwrap());
        apply_cache_strategy(&mut builder, CacheConcurrencyStrategy::ReadWrite).unwrap();
        let config = builder.build().unwrap();

        let strategy = |name: &str| config.class_mapping(name).and_then(|c| c.cache_strategy);
        assert_eq!(strategy("Owner"), Some(CacheConcurrencyStrategy::ReadWrite));
        assert_eq!(strategy("Blob"), None);
        assert_eq!(strategy("SubOwner"), None);
        assert_eq!(
            config.collection_mappings()[0].cache_strategy,
            Some(CacheConcurrencyStrategy::ReadWrite)
        );
    }

    #[test]
    fn test_panic_error_message() {
        let err = panic_error("t", &"boom");
        assert_eq!(err.to_string(), "test 't' panicked: boom");
        let err = panic_error("t", &String::from("bang"));
        assert_eq!(err.to_string(), "test 't' panicked: bang");
    }

    struct Empty {
        dir: tempfile::TempDir,
    }

    impl TestFixture for Empty {
        fn settings(&self) -> Result<TestSettings> {
            Ok(TestSettings::sqlite(self.dir.path().join("empty.db")))
        }
    }

    struct Mapped {
        dir: tempfile::TempDir,
        dialect_ok: bool,
    }

    impl TestFixture for Mapped {
        fn name(&self) -> &str {
            "Mapped"
        }

        fn settings(&self) -> Result<TestSettings> {
            Ok(TestSettings::sqlite(self.dir.path().join("mapped.db")))
        }

        fn mappings(&self) -> Vec<String> {
            vec!["m.json".to_string()]
        }

        fn mapping_source(&self) -> Option<Arc<dyn sqlharness_core::MappingSource>> {
            Some(Arc::new(StaticMappingSource::new().with("m.json", MAPPINGS)))
        }

        fn applies_to_dialect(&self, dialect: Dialect) -> bool {
            self.dialect_ok && dialect == Dialect::Sqlite
        }
    }

    #[test]
    fn test_lifecycle_states() {
        let mut case = TestCase::new(Empty {
            dir: tempfile::tempdir().unwrap(),
        });
        assert_eq!(case.state(), FixtureState::Uninitialized);
        assert_eq!(case.fixture_set_up().unwrap(), SetUpOutcome::Ready);
        assert_eq!(case.state(), FixtureState::FactoryReady);
        assert!(case.fixture_set_up().is_err());

        case.set_up("t").unwrap();
        assert_eq!(case.state(), FixtureState::Running);
        assert_eq!(case.context().current_test(), Some("t"));
        case.tear_down().unwrap();
        assert_eq!(case.state(), FixtureState::FactoryReady);

        case.fixture_tear_down().unwrap();
        assert_eq!(case.state(), FixtureState::Closed);
        assert!(case.context().factory().is_err());
        assert!(case.context().configuration().is_none());
    }

    #[test]
    fn test_tear_down_without_running_test() {
        let mut case = TestCase::new(Empty {
            dir: tempfile::tempdir().unwrap(),
        });
        assert!(case.set_up("t").is_err());
        assert!(matches!(case.tear_down(), Err(TestFailure::Error(_))));
        case.fixture_tear_down().unwrap();
        assert_eq!(case.state(), FixtureState::Uninitialized);
    }

    #[test]
    fn test_mapped_fixture_creates_tables() {
        let mut case = TestCase::new(Mapped {
            dir: tempfile::tempdir().unwrap(),
            dialect_ok: true,
        });
        case.fixture_set_up().unwrap();
        let factory = case.context().factory().unwrap();
        assert_eq!(factory.all_class_metadata().len(), 3);
        assert_eq!(case.context().dialect(), Some(Dialect::Sqlite));
        let owner = factory.configuration().class_mapping("Owner").unwrap();
        assert_eq!(owner.cache_strategy, Some(CacheConcurrencyStrategy::NonstrictReadWrite));
        case.fixture_tear_down().unwrap();
    }

    #[test]
    fn test_dialect_skip_closes_case() {
        let mut case = TestCase::new(Mapped {
            dir: tempfile::tempdir().unwrap(),
            dialect_ok: false,
        });
        let outcome = case.fixture_set_up().unwrap();
        assert!(matches!(outcome, SetUpOutcome::Skipped(ref r) if r.contains("sqlite")));
        assert_eq!(case.state(), FixtureState::Closed);
        assert!(case.context().tracker().is_none());
        case.fixture_tear_down().unwrap();
    }

    #[test]
    fn test_panicking_body_still_tears_down() {
        let mut case = TestCase::new(Mapped {
            dir: tempfile::tempdir().unwrap(),
            dialect_ok: true,
        });
        case.fixture_set_up().unwrap();
        let outcome = case.run_test("panics", |_, ctx| {
            let _session = ctx.open_session()?;
            panic!("boom");
        });
        match outcome {
            TestOutcome::Failed(failure) => {
                assert!(failure.error().is_some_and(|e| e.to_string().contains("boom")));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(case.state(), FixtureState::FactoryReady);
        assert!(!case.context().tracker().unwrap().has_open_connections());
        case.fixture_tear_down().unwrap();
    }
}
