//! Fixtures shared by the harness integration tests.

#![allow(dead_code)]

use sqlharness::prelude::*;
use sqlharness_schema::SchemaGuard;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub fn mappings_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/mappings")
}

/// Names of the tables in the database `settings` point at.
pub fn table_names(settings: &TestSettings) -> Vec<String> {
    let provider = settings.connection_provider().expect("provider");
    let conn = provider.get_connection().expect("connect");
    let rows = conn
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            &[],
        )
        .expect("list tables");
    provider.close_connection(&conn).expect("release");
    rows.iter()
        .filter_map(|r| r.get(0).and_then(Value::as_str).map(String::from))
        .collect()
}

/// Maps `Parent { Id, Name }` onto a SQLite file of its own.
pub struct ParentFixture {
    dir: TempDir,
    pub target: Dialect,
    pub factory_applies: bool,
    pub extra_mappings: Vec<String>,
    /// Number of upcoming factory builds that fail.
    pub failing_factory_builds: Cell<usize>,
    pub fail_tear_down: bool,
    pub schemas_created: Cell<usize>,
    pub set_ups: usize,
    pub tear_downs: usize,
    /// Lets a test body keep a session alive past its end.
    pub kept_session: Option<Session>,
}

impl ParentFixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            target: Dialect::Sqlite,
            factory_applies: true,
            extra_mappings: Vec::new(),
            failing_factory_builds: Cell::new(0),
            fail_tear_down: false,
            schemas_created: Cell::new(0),
            set_ups: 0,
            tear_downs: 0,
            kept_session: None,
        }
    }

    pub fn database(&self) -> TestSettings {
        TestSettings::sqlite(self.dir.path().join("parent.db"))
    }
}

impl TestFixture for ParentFixture {
    fn name(&self) -> &str {
        "ParentFixture"
    }

    fn settings(&self) -> Result<TestSettings> {
        Ok(self.database())
    }

    fn mappings(&self) -> Vec<String> {
        let mut mappings = vec!["parent.json".to_string()];
        mappings.extend(self.extra_mappings.iter().cloned());
        mappings
    }

    fn mapping_source(&self) -> Option<Arc<dyn MappingSource>> {
        Some(Arc::new(DirectoryMappingSource::new(mappings_dir())))
    }

    fn applies_to_dialect(&self, dialect: Dialect) -> bool {
        dialect == self.target
    }

    fn applies_to_factory(&self, _factory: &SessionFactory) -> bool {
        self.factory_applies
    }

    fn create_schema(&self, export: sqlharness_schema::SchemaExport) -> Result<SchemaGuard> {
        self.schemas_created.set(self.schemas_created.get() + 1);
        export.create_guarded()
    }

    fn build_session_factory(
        &self,
        config: Arc<Configuration>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<SessionFactory> {
        let failing = self.failing_factory_builds.get();
        if failing > 0 {
            self.failing_factory_builds.set(failing - 1);
            return Err(Error::Custom("factory build refused".to_string()));
        }
        SessionFactory::build(config, provider)
    }

    fn on_set_up(&mut self, _ctx: &mut TestContext) -> Result<()> {
        self.set_ups += 1;
        Ok(())
    }

    fn on_tear_down(&mut self, _ctx: &mut TestContext) -> Result<()> {
        self.tear_downs += 1;
        if self.fail_tear_down {
            return Err(Error::Custom("tear-down hook failed".to_string()));
        }
        Ok(())
    }
}

/// Insert and commit `Parent { Id = id, Name = name }`.
pub fn insert_parent(session: &Session, id: i64, name: &str) -> Result<()> {
    let tx = session.begin_transaction()?;
    session.save("Parent", &[("Id", Value::BigInt(id)), ("Name", name.into())])?;
    tx.commit()
}
