//! Schema export against SQLite files.

use sqlharness_core::{
    Configuration, ConfigurationBuilder, Connection, ConnectionProvider, Error, MappingDocument,
    SchemaErrorKind,
};
use sqlharness_schema::{SchemaExport, SchemaGuard};
use sqlharness_sqlite::SqliteDriver;
use std::sync::Arc;

const ZOO: &str = r#"{
    "entities": [
        {
            "name": "Animal",
            "id": { "single": { "name": "id", "type": "big_int" } },
            "properties": [ { "name": "name", "type": "text" } ],
            "collections": [ { "name": "nicknames", "element": { "name": "nickname", "type": "text" } } ]
        },
        {
            "name": "Dog",
            "extends": "Animal",
            "properties": [ { "name": "breed", "type": "text" } ]
        }
    ]
}"#;

struct Fixture {
    _dir: tempfile::TempDir,
    config: Arc<Configuration>,
    provider: Arc<dyn ConnectionProvider>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut builder = ConfigurationBuilder::new();
    builder
        .connection_string(format!("sqlite://{}", dir.path().join("zoo.db").display()))
        .driver(Arc::new(SqliteDriver::new()))
        .add_document("zoo.json", MappingDocument::parse("zoo.json", ZOO).expect("parse"));
    let config = Arc::new(builder.build().expect("build"));
    let provider: Arc<dyn ConnectionProvider> =
        Arc::new(config.connection_provider().expect("provider"));
    Fixture {
        _dir: dir,
        config,
        provider,
    }
}

fn table_names(provider: &Arc<dyn ConnectionProvider>) -> Vec<String> {
    let conn = provider.get_connection().expect("connect");
    let rows = conn
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            &[],
        )
        .expect("list tables");
    provider.close_connection(&conn).expect("release");
    rows.iter()
        .filter_map(|r| r.get(0).and_then(|v| v.as_str()).map(String::from))
        .collect()
}

#[test]
fn create_then_drop() {
    let f = fixture();
    let export = SchemaExport::new(Arc::clone(&f.config), Arc::clone(&f.provider));

    export.create(true, true).expect("create");
    assert_eq!(table_names(&f.provider), vec!["Animal", "Animal_nicknames", "Dog"]);

    // Creating again replaces the existing tables.
    export.create(false, true).expect("re-create");

    export.drop(true, true).expect("drop");
    assert!(table_names(&f.provider).is_empty());
}

#[test]
fn output_only_touches_nothing() {
    let f = fixture();
    let export = SchemaExport::new(Arc::clone(&f.config), Arc::clone(&f.provider));
    export.create(true, false).expect("script only");
    assert!(table_names(&f.provider).is_empty());
}

#[test]
fn failed_create_drops_what_it_created() {
    let f = fixture();
    {
        let conn = f.provider.get_connection().expect("connect");
        // A view cannot be dropped with DROP TABLE, so creating "Dog" fails.
        conn.execute("CREATE VIEW \"Dog\" AS SELECT 1 AS x", &[])
            .expect("create view");
        f.provider.close_connection(&conn).expect("release");
    }

    let export = SchemaExport::new(Arc::clone(&f.config), Arc::clone(&f.provider));
    let err = export.create(false, true).expect_err("create must fail");
    match err {
        Error::Schema(e) => {
            assert_eq!(e.kind, SchemaErrorKind::Create);
            assert!(e.message.contains("Dog"));
        }
        other => panic!("expected schema error, got {other:?}"),
    }
    assert!(table_names(&f.provider).is_empty());
}

#[test]
fn guard_drops_unless_kept() {
    let f = fixture();
    let export = SchemaExport::new(Arc::clone(&f.config), Arc::clone(&f.provider));

    {
        let _guard: SchemaGuard = export.clone().create_guarded().expect("create");
        assert_eq!(table_names(&f.provider).len(), 3);
    }
    assert!(table_names(&f.provider).is_empty());

    let kept = export.create_guarded().expect("create").keep();
    assert_eq!(table_names(&f.provider).len(), 3);
    kept.drop(false, true).expect("drop");
    assert!(table_names(&f.provider).is_empty());
}
