//! Running a fixture's tests end to end.

use crate::case::{SetUpOutcome, TestCase};
use crate::context::TestContext;
use crate::fixture::TestFixture;
use crate::outcome::{TestFailure, TestOutcome};
use sqlharness_core::{Error, Result};
use std::fmt;

type TestBody<F> = Box<dyn FnOnce(&mut F, &mut TestContext) -> Result<()>>;

/// Runs a list of named tests against one fixture: fixture setup, every test
/// in order, fixture teardown.
pub struct FixtureRunner<F: TestFixture> {
    case: TestCase<F>,
    tests: Vec<(String, TestBody<F>)>,
}

impl<F: TestFixture> fmt::Debug for FixtureRunner<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureRunner")
            .field("case", &self.case)
            .field("tests", &self.tests.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl<F: TestFixture> FixtureRunner<F> {
    pub fn new(fixture: F) -> Self {
        Self {
            case: TestCase::new(fixture),
            tests: Vec::new(),
        }
    }

    /// Add a test.
    pub fn test<B>(mut self, name: impl Into<String>, body: B) -> Self
    where
        B: FnOnce(&mut F, &mut TestContext) -> Result<()> + 'static,
    {
        self.tests.push((name.into(), Box::new(body)));
        self
    }

    /// Run everything and report per-test outcomes.
    pub fn run(mut self) -> FixtureReport {
        let fixture = self.case.context().fixture_name().to_string();
        let names = self.tests.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>();

        let mut report = FixtureReport {
            fixture,
            set_up_error: None,
            tear_down_error: None,
            outcomes: Vec::with_capacity(names.len()),
        };

        match self.case.fixture_set_up() {
            Ok(SetUpOutcome::Ready) => {}
            Ok(SetUpOutcome::Skipped(reason)) => {
                report.outcomes = names
                    .into_iter()
                    .map(|n| (n, TestOutcome::Skipped(reason.clone())))
                    .collect();
                return report;
            }
            Err(e) => {
                let message = format!("fixture set-up failed: {e}");
                report.outcomes = names
                    .into_iter()
                    .map(|n| (n, TestOutcome::Failed(TestFailure::Error(Error::Custom(message.clone())))))
                    .collect();
                report.set_up_error = Some(e);
                return report;
            }
        }

        for (name, body) in std::mem::take(&mut self.tests) {
            let outcome = self.case.run_test(&name, body);
            report.outcomes.push((name, outcome));
        }

        if let Err(e) = self.case.fixture_tear_down() {
            report.tear_down_error = Some(e);
        }
        report
    }
}

/// What happened when a fixture ran.
#[derive(Debug)]
pub struct FixtureReport {
    pub fixture: String,
    /// Why fixture setup failed, if it did.
    pub set_up_error: Option<Error>,
    pub tear_down_error: Option<Error>,
    /// Per-test outcomes in run order.
    pub outcomes: Vec<(String, TestOutcome)>,
}

impl FixtureReport {
    pub fn outcome(&self, test: &str) -> Option<&TestOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == test)
            .map(|(_, outcome)| outcome)
    }

    pub fn passed(&self) -> usize {
        self.count(TestOutcome::is_passed)
    }

    pub fn failed(&self) -> usize {
        self.count(TestOutcome::is_failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TestOutcome::is_skipped)
    }

    /// Failed tests with their failures.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &TestFailure)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.failure().map(|f| (name.as_str(), f)))
    }

    /// True when nothing failed, fixture setup and teardown included.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.set_up_error.is_none() && self.tear_down_error.is_none()
    }

    /// Panic with a summary unless [`is_success`](Self::is_success).
    pub fn assert_success(&self) {
        assert!(self.is_success(), "{self}");
    }

    fn count(&self, pred: fn(&TestOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

impl fmt::Display for FixtureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} passed, {} failed, {} skipped",
            self.fixture,
            self.passed(),
            self.failed(),
            self.skipped()
        )?;
        if let Some(e) = &self.set_up_error {
            writeln!(f, "  set-up: {e}")?;
        }
        for (name, failure) in self.failures() {
            writeln!(f, "  {name}: {failure}")?;
        }
        if let Some(e) = &self.tear_down_error {
            writeln!(f, "  tear-down: {e}")?;
        }
        Ok(())
    }
}
