//! What hooks and test bodies work with.

use crate::settings::TestSettings;
use crate::tracker::ConnectionTracker;
use sqlharness_core::{
    Configuration, ConnectionProvider, ConnectionRef, Dialect, Error, Result, Transaction,
    TransactionError, TransactionErrorKind,
};
use sqlharness_session::{Interceptor, Session, SessionFactory, WeakSession};
use std::sync::Arc;

/// Per-fixture state handed to hooks and test bodies.
///
/// Sessions opened here are remembered (weakly) so the harness can check
/// after the test that the most recent one was closed.
#[derive(Debug)]
pub struct TestContext {
    fixture: String,
    pub(crate) config: Option<Arc<Configuration>>,
    pub(crate) tracker: Option<Arc<ConnectionTracker>>,
    pub(crate) factory: Option<SessionFactory>,
    pub(crate) last_session: WeakSession,
    pub(crate) current_test: Option<String>,
}

impl TestContext {
    pub(crate) fn new(fixture: impl Into<String>) -> Self {
        Self {
            fixture: fixture.into(),
            config: None,
            tracker: None,
            factory: None,
            last_session: WeakSession::default(),
            current_test: None,
        }
    }

    pub fn fixture_name(&self) -> &str {
        &self.fixture
    }

    /// Name of the test currently running, if any.
    pub fn current_test(&self) -> Option<&str> {
        self.current_test.as_deref()
    }

    /// The session factory.
    pub fn factory(&self) -> Result<&SessionFactory> {
        self.factory.as_ref().ok_or_else(|| {
            Error::Custom(format!("fixture '{}' has no session factory", self.fixture))
        })
    }

    pub fn configuration(&self) -> Option<&Arc<Configuration>> {
        self.config.as_ref()
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.config.as_ref().map(|c| c.dialect())
    }

    /// The tracker the factory's sessions acquire connections through.
    pub fn tracker(&self) -> Option<&Arc<ConnectionTracker>> {
        self.tracker.as_ref()
    }

    /// Open a session and remember it as the last opened one.
    pub fn open_session(&mut self) -> Result<Session> {
        let session = self.factory()?.open_session()?;
        self.last_session = session.downgrade();
        Ok(session)
    }

    /// Open a session with an interceptor and remember it as the last opened one.
    pub fn open_session_with(&mut self, interceptor: Arc<dyn Interceptor>) -> Result<Session> {
        let session = self.factory()?.open_session_with(interceptor)?;
        self.last_session = session.downgrade();
        Ok(session)
    }

    /// Run `sql` on a connection of its own, in a transaction of its own.
    ///
    /// The connection bypasses the session factory and is closed before this
    /// returns. Without a fixture configuration the default settings are
    /// used. Returns the number of rows changed.
    pub fn execute_statement(&self, sql: &str) -> Result<u64> {
        let provider = match &self.config {
            Some(config) => config.connection_provider()?,
            None => TestSettings::load()?.connection_provider()?,
        };
        let conn = provider.get_connection()?;
        let result = execute_in_own_transaction(&conn, sql);
        if let Err(e) = provider.close_connection(&conn) {
            tracing::warn!(connection = %conn.id(), error = %e, "Closing ad-hoc connection failed");
        }
        result
    }

    /// Run `sql` on `session`'s connection, inside `transaction` if given.
    ///
    /// The transaction must belong to the session's connection.
    pub fn execute_statement_in(
        &self,
        session: &Session,
        transaction: Option<&Transaction>,
        sql: &str,
    ) -> Result<u64> {
        let conn = session.connection()?;
        match transaction {
            Some(tx) if tx.connection_id() != conn.id() => {
                Err(Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::ForeignConnection,
                    message: format!(
                        "transaction on {} is not enlisted on {}'s connection {}",
                        tx.connection_id(),
                        session.id(),
                        conn.id()
                    ),
                }))
            }
            Some(tx) => tx.execute(sql, &[]),
            None => session.execute(sql, &[]),
        }
    }
}

fn execute_in_own_transaction(conn: &ConnectionRef, sql: &str) -> Result<u64> {
    tracing::debug!(connection = %conn.id(), sql, "Executing ad-hoc statement");
    let tx = Transaction::begin(conn)?;
    let changed = tx.execute(sql, &[])?;
    tx.commit()?;
    Ok(changed)
}
