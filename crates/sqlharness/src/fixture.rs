//! The overridable surface of a fixture.

use crate::context::TestContext;
use crate::settings::TestSettings;
use sqlharness_core::{
    CacheConcurrencyStrategy, Configuration, ConfigurationBuilder, ConnectionProvider, Dialect,
    MappingSource, Result,
};
use sqlharness_schema::{SchemaExport, SchemaGuard};
use sqlharness_session::SessionFactory;
use std::sync::Arc;

/// A group of tests sharing one schema and one session factory.
///
/// Every method has a default; a fixture usually overrides
/// [`mappings`](TestFixture::mappings), [`mapping_source`](TestFixture::mapping_source)
/// and whichever hooks it needs.
pub trait TestFixture {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Database settings the configuration starts from.
    fn settings(&self) -> Result<TestSettings> {
        TestSettings::load()
    }

    /// Logical names of the mapping resources to load.
    fn mappings(&self) -> Vec<String> {
        Vec::new()
    }

    /// Where mapping resources are loaded from. Required when
    /// [`mappings`](TestFixture::mappings) is not empty.
    fn mapping_source(&self) -> Option<Arc<dyn MappingSource>> {
        None
    }

    /// Cache strategy applied to eligible entities and to every collection.
    /// `None` leaves caching unconfigured.
    fn cache_concurrency_strategy(&self) -> Option<CacheConcurrencyStrategy> {
        Some(CacheConcurrencyStrategy::default())
    }

    /// Adjust the configuration after mappings are added.
    fn configure(&self, _builder: &mut ConfigurationBuilder) -> Result<()> {
        Ok(())
    }

    fn applies_to_dialect(&self, _dialect: Dialect) -> bool {
        true
    }

    fn applies_to_factory(&self, _factory: &SessionFactory) -> bool {
        true
    }

    /// Create the schema. The returned guard drops it again.
    fn create_schema(&self, export: SchemaExport) -> Result<SchemaGuard> {
        export.create_guarded()
    }

    fn build_session_factory(
        &self,
        config: Arc<Configuration>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<SessionFactory> {
        SessionFactory::build(config, provider)
    }

    /// Runs before each test.
    fn on_set_up(&mut self, _ctx: &mut TestContext) -> Result<()> {
        Ok(())
    }

    /// Runs after each test, before the leak checks.
    fn on_tear_down(&mut self, _ctx: &mut TestContext) -> Result<()> {
        Ok(())
    }
}
