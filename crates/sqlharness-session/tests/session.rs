//! Session behaviour against a SQLite file.

use sqlharness_core::{
    Configuration, ConfigurationBuilder, Connection, ConnectionProvider, ConnectionRef,
    DriverConnectionProvider, MappingDocument, Result, Value,
};
use sqlharness_schema::SchemaExport;
use sqlharness_session::{Interceptor, SessionFactory};
use sqlharness_sqlite::SqliteDriver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MAPPINGS: &str = r#"{
    "entities": [
        {
            "name": "Parent",
            "id": { "composite": [
                { "name": "prop1", "type": { "var_char": 32 } },
                { "name": "prop2", "type": { "var_char": 32 } }
            ] },
            "properties": [ { "name": "name", "type": "text" } ]
        },
        {
            "name": "Child",
            "extends": "Parent",
            "properties": [ { "name": "toy", "type": "text" } ]
        }
    ]
}"#;

/// Counts releases that go through the provider.
#[derive(Debug)]
struct CountingProvider {
    inner: DriverConnectionProvider,
    released: AtomicUsize,
}

impl ConnectionProvider for CountingProvider {
    fn connection_string(&self) -> &str {
        self.inner.connection_string()
    }

    fn get_connection(&self) -> Result<ConnectionRef> {
        self.inner.get_connection()
    }

    fn close_connection(&self, conn: &ConnectionRef) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.close_connection(conn)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    provider: Arc<CountingProvider>,
    factory: SessionFactory,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut builder = ConfigurationBuilder::new();
    builder
        .connection_string(format!("sqlite://{}", dir.path().join("s.db").display()))
        .driver(Arc::new(SqliteDriver::new()))
        .add_document("m.json", MappingDocument::parse("m.json", MAPPINGS).expect("parse"));
    let config: Arc<Configuration> = Arc::new(builder.build().expect("build"));
    let provider = Arc::new(CountingProvider {
        inner: config.connection_provider().expect("provider"),
        released: AtomicUsize::new(0),
    });
    SchemaExport::new(Arc::clone(&config), provider.clone())
        .create(false, true)
        .expect("schema");
    let factory = SessionFactory::build(config, provider.clone()).expect("factory");
    Fixture {
        _dir: dir,
        provider,
        factory,
    }
}

fn released(f: &Fixture) -> usize {
    f.provider.released.load(Ordering::SeqCst)
}

#[test]
fn save_commit_and_query() {
    let f = fixture();
    let session = f.factory.open_session().expect("open");
    let tx = session.begin_transaction().expect("begin");
    session
        .save(
            "Child",
            &[
                ("prop1", "a".into()),
                ("prop2", "b".into()),
                ("name", "Bob".into()),
                ("toy", "ball".into()),
            ],
        )
        .expect("save");
    tx.commit().expect("commit");

    assert_eq!(session.count("Parent").expect("count parent"), 1);
    assert_eq!(session.count("Child").expect("count child"), 1);
    assert_eq!(session.query_all_entities().expect("all").len(), 2);

    let row = session
        .get("Parent", &["a".into(), "b".into()])
        .expect("get")
        .expect("row");
    assert_eq!(row.get_by_name("name").and_then(Value::as_str), Some("Bob"));
    assert!(session.get("Parent", &["a".into(), "x".into()]).expect("get").is_none());

    assert_eq!(session.delete_all().expect("delete"), 2);
    assert!(session.query_all_entities().expect("all").is_empty());
    session.close().expect("close");
}

#[test]
fn save_rejects_unknown_property_and_missing_id() {
    let f = fixture();
    let session = f.factory.open_session().expect("open");
    assert!(session.save("Parent", &[("prop1", "a".into()), ("bogus", Value::BigInt(1))]).is_err());
    assert!(session.save("Parent", &[("prop1", "a".into())]).is_err());
    assert!(session.save("Nobody", &[]).is_err());
    session.close().expect("close");
}

#[test]
fn close_releases_through_provider() {
    let f = fixture();
    let before = released(&f);
    let session = f.factory.open_session().expect("open");
    let conn = session.connection().expect("connection");
    assert!(conn.is_open());

    session.close().expect("close");
    assert!(!session.is_open());
    assert!(!conn.is_open());
    assert_eq!(released(&f), before + 1);

    // Closing again is a no-op and the session refuses further work.
    session.close().expect("close twice");
    assert!(session.connection().is_err());
    assert_eq!(released(&f), before + 1);
}

#[test]
fn dropping_unclosed_session_closes_connection_directly() {
    let f = fixture();
    let before = released(&f);
    let session = f.factory.open_session().expect("open");
    let weak = session.downgrade();
    let conn = session.connection().expect("connection");
    assert!(weak.is_open());

    drop(session);
    assert!(weak.upgrade().is_none());
    assert!(!weak.is_open());
    assert!(!conn.is_open());
    assert_eq!(released(&f), before);
}

#[test]
fn session_without_connection_acquires_nothing() {
    let f = fixture();
    let before = released(&f);
    let session = f.factory.open_session().expect("open");
    session.close().expect("close");
    assert_eq!(released(&f), before);
}

#[derive(Debug, Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Interceptor for Recorder {
    fn on_prepare_statement(&self, sql: &str) -> String {
        self.seen.lock().expect("lock poisoned").push(sql.to_string());
        sql.to_string()
    }
}

#[test]
fn interceptor_sees_every_statement() {
    let f = fixture();
    let recorder = Arc::new(Recorder::default());
    let session = f.factory.open_session_with(recorder.clone()).expect("open");
    session.count("Parent").expect("count");
    session.execute("DELETE FROM \"Child\"", &[]).expect("delete");
    session.close().expect("close");

    let seen = recorder.seen.lock().expect("lock poisoned");
    assert_eq!(seen.len(), 2);
    assert!(seen[0].starts_with("SELECT COUNT(*)"));
}

#[test]
fn factory_metadata_and_close() {
    let f = fixture();
    let metadata = f.factory.all_class_metadata();
    assert_eq!(metadata.len(), 2);
    let parent = f.factory.class_metadata("Parent").expect("parent");
    assert!(parent.has_composite_identifier());
    assert_eq!(parent.identifier_columns(), ["prop1", "prop2"]);
    assert_eq!(f.factory.class_metadata("Child").and_then(|c| c.superclass()), Some("Parent"));
    assert_eq!(
        f.factory.connection_provider().connection_string(),
        f.provider.connection_string()
    );

    f.factory.close();
    f.factory.close();
    assert!(f.factory.is_closed());
    assert!(f.factory.open_session().is_err());
}
