//! Test results and leak diagnostics.

use sqlharness_core::Error;
use std::fmt;

/// Result of the three post-test resource checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakReport {
    pub session_closed: bool,
    pub database_cleaned: bool,
    pub connections_closed: bool,
}

impl Default for LeakReport {
    fn default() -> Self {
        Self::clean()
    }
}

impl LeakReport {
    /// A report where every check passed.
    pub const fn clean() -> Self {
        Self {
            session_closed: true,
            database_cleaned: true,
            connections_closed: true,
        }
    }

    pub const fn is_clean(&self) -> bool {
        self.session_closed && self.database_cleaned && self.connections_closed
    }

    /// Names of the checks that failed, in check order.
    pub fn leaked(&self) -> Vec<&'static str> {
        [
            (self.session_closed, "session"),
            (self.database_cleaned, "database"),
            (self.connections_closed, "connections"),
        ]
        .into_iter()
        .filter(|(passed, _)| !passed)
        .map(|(_, name)| name)
        .collect()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Test didn't clean up after itself. session closed: {} database cleaned: {} connection closed: {}",
            self.session_closed, self.database_cleaned, self.connections_closed
        )
    }
}

/// Why a test failed.
#[derive(Debug)]
pub enum TestFailure {
    /// The test body or one of its hooks returned an error.
    Error(Error),
    /// The test left resources behind. They have been cleaned up.
    Leaked(LeakReport),
    /// The test failed with an error and also left resources behind.
    ErrorAndLeaked(Error, LeakReport),
}

impl TestFailure {
    /// Attach the report of the post-test checks. A clean report leaves the
    /// failure unchanged.
    pub fn with_leaks(self, report: LeakReport) -> Self {
        if report.is_clean() {
            return self;
        }
        match self {
            TestFailure::Error(e) | TestFailure::ErrorAndLeaked(e, _) => {
                TestFailure::ErrorAndLeaked(e, report)
            }
            TestFailure::Leaked(_) => TestFailure::Leaked(report),
        }
    }

    /// The leak report, if the test left anything behind.
    pub fn leak_report(&self) -> Option<&LeakReport> {
        match self {
            TestFailure::Leaked(report) | TestFailure::ErrorAndLeaked(_, report) => Some(report),
            TestFailure::Error(_) => None,
        }
    }

    /// The error the test failed with, if any.
    pub fn error(&self) -> Option<&Error> {
        match self {
            TestFailure::Error(e) | TestFailure::ErrorAndLeaked(e, _) => Some(e),
            TestFailure::Leaked(_) => None,
        }
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFailure::Error(e) => write!(f, "{e}"),
            TestFailure::Leaked(report) => write!(f, "{report}"),
            TestFailure::ErrorAndLeaked(e, report) => write!(f, "{e}; {report}"),
        }
    }
}

impl std::error::Error for TestFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<Error> for TestFailure {
    fn from(e: Error) -> Self {
        TestFailure::Error(e)
    }
}

/// Outcome of one test run through the harness.
#[derive(Debug)]
pub enum TestOutcome {
    Passed,
    Failed(TestFailure),
    /// The fixture does not apply; the reason says why.
    Skipped(String),
}

impl TestOutcome {
    pub const fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }

    pub const fn is_skipped(&self) -> bool {
        matches!(self, TestOutcome::Skipped(_))
    }

    pub fn failure(&self) -> Option<&TestFailure> {
        match self {
            TestOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
