//! Post-test leak detection and repair.

mod fixtures;

use fixtures::{ParentFixture, insert_parent, table_names};
use sqlharness::prelude::*;

fn ready_case(fixture: ParentFixture) -> TestCase<ParentFixture> {
    let mut case = TestCase::new(fixture);
    assert_eq!(case.fixture_set_up().expect("set up"), SetUpOutcome::Ready);
    case
}

fn leak_report(failure: TestFailure) -> LeakReport {
    match failure {
        TestFailure::Leaked(report) => report,
        other => panic!("expected only a leak, got: {other}"),
    }
}

#[test]
fn leftover_row_fails_database_check_and_schema_is_recreated() {
    let mut case = ready_case(ParentFixture::new());

    case.set_up("leaves Bob behind").expect("set up");
    {
        let session = case.context_mut().open_session().expect("open");
        insert_parent(&session, 1, "Bob").expect("insert");
        session.close().expect("close");
    }
    let report = leak_report(case.tear_down().expect_err("database leak"));
    assert_eq!(report.leaked(), vec!["database"]);
    assert!(report.session_closed);
    assert!(report.connections_closed);
    assert!(report.to_string().contains("database cleaned: false"));

    let outcome = case.run_test("sees a clean database", |_, ctx| {
        let session = ctx.open_session()?;
        assert_eq!(session.count("Parent")?, 0);
        insert_parent(&session, 1, "Bob")?;
        assert_eq!(session.delete_all()?, 1);
        session.close()
    });
    assert!(outcome.is_passed(), "{outcome:?}");

    let database = case.fixture().database();
    case.fixture_tear_down().expect("tear down");
    assert!(table_names(&database).is_empty());
}

#[test]
fn unclosed_session_fails_session_check_and_is_closed() {
    let mut case = ready_case(ParentFixture::new());

    case.set_up("forgets its session").expect("set up");
    let session = case.context_mut().open_session().expect("open");
    session.count("Parent").expect("count");
    let conn = session.connection().expect("connection");

    let report = leak_report(case.tear_down().expect_err("session leak"));
    assert_eq!(report.leaked(), vec!["session"]);
    assert!(!session.is_open());
    assert!(!conn.is_open());
    assert!(!case.context().tracker().expect("tracker").has_open_connections());

    case.fixture_tear_down().expect("tear down");
}

#[test]
fn unreleased_connection_fails_connection_check_and_is_released() {
    let mut case = ready_case(ParentFixture::new());
    let tracker = case.context().tracker().expect("tracker").clone();

    case.set_up("holds a connection").expect("set up");
    let conn = tracker.get_connection().expect("connect");

    let report = leak_report(case.tear_down().expect_err("connection leak"));
    assert_eq!(report.leaked(), vec!["connections"]);
    assert!(!conn.is_open());
    assert_eq!(tracker.tracked_count(), 0);

    case.fixture_tear_down().expect("tear down");
}

#[test]
fn unclosed_session_with_data_fails_both_checks() {
    let mut case = ready_case(ParentFixture::new());

    let outcome = case.run_test("leaves everything open", |fixture, ctx| {
        let session = ctx.open_session()?;
        insert_parent(&session, 7, "Eve")?;
        fixture.kept_session = Some(session);
        Ok(())
    });
    let failure = match outcome {
        TestOutcome::Failed(failure) => failure,
        other => panic!("expected a failure, got {other:?}"),
    };
    assert_eq!(
        failure.leak_report().map(LeakReport::leaked),
        Some(vec!["session", "database"])
    );
    let kept = case.fixture_mut().kept_session.take().expect("kept session");
    assert!(!kept.is_open());

    let outcome = case.run_test("starts clean", |_, ctx| {
        let session = ctx.open_session()?;
        assert_eq!(session.count("Parent")?, 0);
        session.close()
    });
    assert!(outcome.is_passed(), "{outcome:?}");
    case.fixture_tear_down().expect("tear down");
}

#[test]
fn dropped_session_is_not_a_leak() {
    let mut case = ready_case(ParentFixture::new());

    let outcome = case.run_test("drops its session", |_, ctx| {
        let session = ctx.open_session()?;
        session.count("Parent")?;
        Ok(())
    });
    assert!(outcome.is_passed(), "{outcome:?}");

    let tracker = case.context().tracker().expect("tracker");
    assert!(!tracker.has_open_connections());
    assert_eq!(tracker.tracked_count(), 0);

    case.fixture_tear_down().expect("tear down");
}

#[test]
fn tracker_does_not_grow_across_passing_tests() {
    let mut case = ready_case(ParentFixture::new());

    for i in 0..20 {
        let outcome = case.run_test(&format!("drops its session {i}"), |_, ctx| {
            let session = ctx.open_session()?;
            session.count("Parent")?;
            Ok(())
        });
        assert!(outcome.is_passed(), "{outcome:?}");
        assert_eq!(case.context().tracker().expect("tracker").tracked_count(), 0);
    }

    case.fixture_tear_down().expect("tear down");
}

#[test]
fn failing_body_still_reports_its_leftover_rows() {
    let mut case = ready_case(ParentFixture::new());

    let outcome = case.run_test("fails after committing", |_, ctx| {
        let session = ctx.open_session()?;
        insert_parent(&session, 1, "Bob")?;
        session.close()?;
        Err(Error::Custom("assertion failed".to_string()))
    });
    let failure = match outcome {
        TestOutcome::Failed(failure) => failure,
        other => panic!("expected a failure, got {other:?}"),
    };
    assert_eq!(
        failure.error().map(ToString::to_string).as_deref(),
        Some("assertion failed")
    );
    assert_eq!(failure.leak_report().map(LeakReport::leaked), Some(vec!["database"]));
    let message = failure.to_string();
    assert!(message.starts_with("assertion failed"), "{message}");
    assert!(message.contains("database cleaned: false"), "{message}");

    let outcome = case.run_test("sees a clean database", |_, ctx| {
        let session = ctx.open_session()?;
        assert_eq!(session.count("Parent")?, 0);
        session.close()
    });
    assert!(outcome.is_passed(), "{outcome:?}");
    case.fixture_tear_down().expect("tear down");
}

#[test]
fn hook_error_wins_but_checks_still_repair() {
    let mut fixture = ParentFixture::new();
    fixture.fail_tear_down = true;
    let mut case = ready_case(fixture);

    case.set_up("hook fails").expect("set up");
    let session = case.context_mut().open_session().expect("open");
    session.count("Parent").expect("count");

    match case.tear_down() {
        Err(TestFailure::ErrorAndLeaked(e, report)) => {
            assert_eq!(e.to_string(), "tear-down hook failed");
            assert_eq!(report.leaked(), vec!["session"]);
        }
        other => panic!("expected hook error with a leak, got {other:?}"),
    }
    assert!(!session.is_open());
    assert!(!case.context().tracker().expect("tracker").has_open_connections());
    assert_eq!(case.fixture().set_ups, 1);
    assert_eq!(case.fixture().tear_downs, 1);
    assert_eq!(case.state(), FixtureState::FactoryReady);

    case.fixture_tear_down().expect("tear down");
}

#[test]
fn runner_reports_each_test() {
    let report = FixtureRunner::new(ParentFixture::new())
        .test("clean", |_, ctx| {
            let session = ctx.open_session()?;
            insert_parent(&session, 1, "Bob")?;
            session.delete_all()?;
            session.close()
        })
        .test("dirty", |_, ctx| {
            let session = ctx.open_session()?;
            insert_parent(&session, 2, "Ann")?;
            session.close()
        })
        .test("clean again", |_, ctx| {
            let session = ctx.open_session()?;
            assert_eq!(session.count("Parent")?, 0);
            session.close()
        })
        .run();

    assert_eq!(report.fixture, "ParentFixture");
    assert_eq!(report.passed(), 2);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_success());
    let failures = report.failures().map(|(name, _)| name).collect::<Vec<_>>();
    assert_eq!(failures, vec!["dirty"]);
    assert!(report.to_string().contains("database cleaned: false"));
    assert!(report.tear_down_error.is_none());
}
