//! Regression fixture for an entity with a two-part composite identifier.
//!
//! Mappings come from `tests/mappings/issues/NH3841/mappings.json`, found by
//! the bug-fixture naming convention.

mod fixtures;

use fixtures::mappings_dir;
use sqlharness::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

/// Identifier of `ParentEntity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ParentEntityId {
    prop1: String,
    prop2: String,
}

impl ParentEntityId {
    fn new(prop1: &str, prop2: &str) -> Self {
        Self {
            prop1: prop1.to_string(),
            prop2: prop2.to_string(),
        }
    }

    fn values(&self) -> [Value; 2] {
        [self.prop1.as_str().into(), self.prop2.as_str().into()]
    }
}

struct Fixture {
    dir: TempDir,
}

impl TestFixture for Fixture {
    fn name(&self) -> &str {
        "NH3841"
    }

    fn settings(&self) -> Result<TestSettings> {
        Ok(TestSettings::sqlite(self.dir.path().join("nh3841.db")))
    }

    fn mappings(&self) -> Vec<String> {
        sqlharness::bug_mappings!()
    }

    fn mapping_source(&self) -> Option<Arc<dyn MappingSource>> {
        Some(Arc::new(DirectoryMappingSource::new(mappings_dir())))
    }

    fn on_set_up(&mut self, ctx: &mut TestContext) -> Result<()> {
        let session = ctx.open_session()?;
        let tx = session.begin_transaction()?;
        let id = ParentEntityId::new("a", "1");
        session.save(
            "ParentEntity",
            &[
                ("prop1", id.prop1.as_str().into()),
                ("prop2", id.prop2.as_str().into()),
                ("Name", "first".into()),
            ],
        )?;
        tx.commit()?;
        session.close()
    }

    fn on_tear_down(&mut self, ctx: &mut TestContext) -> Result<()> {
        let session = ctx.open_session()?;
        let tx = session.begin_transaction()?;
        session.delete_all()?;
        tx.commit()?;
        session.close()
    }
}

fn fixture() -> Fixture {
    Fixture {
        dir: tempfile::tempdir().expect("tempdir"),
    }
}

#[test]
fn mapping_resource_follows_the_module_name() {
    assert_eq!(fixture().mappings(), vec!["issues.NH3841.mappings.json"]);
}

#[test]
fn composite_ids_compare_structurally() {
    let a = ParentEntityId::new("a", "1");
    let same = ParentEntityId::new("a", "1");
    let swapped = ParentEntityId::new("1", "a");
    assert_eq!(a, same);
    assert_ne!(a, swapped);

    let set = [a.clone(), same, swapped].into_iter().collect::<HashSet<_>>();
    assert_eq!(set.len(), 2);
    assert!(set.contains(&a));
}

#[test]
fn composite_identifier_round_trips_through_the_harness() {
    let report = FixtureRunner::new(fixture())
        .test("metadata", |_, ctx| {
            let factory = ctx.factory()?;
            let parent = factory
                .class_metadata("ParentEntity")
                .expect("ParentEntity is mapped");
            assert!(parent.has_composite_identifier());
            assert_eq!(parent.identifier_columns(), ["prop1", "prop2"]);

            let config = factory.configuration();
            assert_eq!(
                config.class_mapping("ParentEntity").and_then(|c| c.cache_strategy),
                Some(CacheConcurrencyStrategy::NonstrictReadWrite)
            );
            assert_eq!(
                config.class_mapping("ChildEntity").and_then(|c| c.cache_strategy),
                None
            );
            assert!(
                config
                    .collection_mappings()
                    .iter()
                    .all(|c| c.cache_strategy.is_some())
            );
            Ok(())
        })
        .test("load by composite id", |_, ctx| {
            let session = ctx.open_session()?;
            let found = session.get("ParentEntity", &ParentEntityId::new("a", "1").values())?;
            assert_eq!(
                found.as_ref().and_then(|r| r.get_by_name("Name")).and_then(Value::as_str),
                Some("first")
            );
            let missing = session.get("ParentEntity", &ParentEntityId::new("1", "a").values())?;
            assert!(missing.is_none());
            session.close()
        })
        .test("subclass shares the identifier", |_, ctx| {
            let session = ctx.open_session()?;
            let tx = session.begin_transaction()?;
            session.save(
                "ChildEntity",
                &[
                    ("prop1", "b".into()),
                    ("prop2", "2".into()),
                    ("Name", "second".into()),
                    ("Toy", "ball".into()),
                ],
            )?;
            tx.commit()?;
            assert_eq!(session.count("ParentEntity")?, 2);
            assert_eq!(session.count("ChildEntity")?, 1);
            session.close()
        })
        .run();

    report.assert_success();
    assert_eq!(report.passed(), 3);
}
