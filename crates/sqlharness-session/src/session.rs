//! Sessions.

use crate::factory::FactoryInner;
use crate::interceptor::Interceptor;
use sqlharness_core::{
    ClassMapping, ConnectionRef, Error, MappingError, MappingErrorKind, Result, Row, Transaction,
    Value, quote_ident,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Process-unique session identity, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[derive(Default)]
struct SessionState {
    closed: bool,
    connection: Option<ConnectionRef>,
}

struct SessionInner {
    id: SessionId,
    factory: Arc<FactoryInner>,
    interceptor: Option<Arc<dyn Interceptor>>,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.lock();
        if state.closed {
            return;
        }
        if let Some(conn) = state.connection.as_ref().filter(|c| c.is_open()) {
            tracing::debug!(session = %self.id, connection = %conn.id(), "Unclosed session dropped; closing its connection");
            if let Err(e) = conn.close() {
                tracing::warn!(session = %self.id, error = %e, "Closing connection of dropped session failed");
            }
        }
    }
}

/// A unit-of-work handle bound to at most one physical connection.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(factory: Arc<FactoryInner>, interceptor: Option<Arc<dyn Interceptor>>) -> Self {
        let id = SessionId::next();
        tracing::trace!(session = %id, "Session opened");
        Self {
            inner: Arc::new(SessionInner {
                id,
                factory,
                interceptor,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn is_open(&self) -> bool {
        !self.inner.lock().closed
    }

    /// A weak handle that does not keep the session alive.
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The session's connection, acquired from the provider on first use.
    pub fn connection(&self) -> Result<ConnectionRef> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(Error::connection_closed(format!("{} is closed", self.inner.id)));
        }
        if let Some(conn) = &state.connection {
            return Ok(Arc::clone(conn));
        }
        let conn = self.inner.factory.provider.get_connection()?;
        tracing::trace!(session = %self.inner.id, connection = %conn.id(), "Session acquired connection");
        state.connection = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Begin a transaction on the session's connection.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        Transaction::begin(&self.connection()?)
    }

    /// Execute a statement on the session's connection.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = self.prepare(sql);
        self.connection()?.execute(&sql, params)
    }

    /// Run a query on the session's connection.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = self.prepare(sql);
        self.connection()?.query(&sql, params)
    }

    /// Insert an entity.
    ///
    /// `values` are `(property, value)` pairs and must include every
    /// identifier property. Subclass entities are written to every table of
    /// their hierarchy, superclass first.
    pub fn save(&self, entity_name: &str, values: &[(&str, Value)]) -> Result<()> {
        let chain = self.hierarchy(entity_name)?;

        for (name, _) in values {
            let known = chain
                .iter()
                .any(|c| c.columns().any(|p| p.name == *name));
            if !known {
                return Err(invalid_mapping(format!(
                    "entity '{entity_name}' has no property '{name}'"
                )));
            }
        }

        for class in chain {
            let mut columns = Vec::new();
            let mut params = Vec::new();
            for property in class.columns() {
                match values.iter().find(|(name, _)| *name == property.name) {
                    Some((_, value)) => {
                        columns.push(quote_ident(property.column_name()));
                        params.push(value.clone());
                    }
                    None if class.id.contains(property) => {
                        return Err(invalid_mapping(format!(
                            "identifier property '{}' of '{entity_name}' has no value",
                            property.name
                        )));
                    }
                    None => {}
                }
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&class.table),
                columns.join(", "),
                placeholders
            );
            self.execute(&sql, &params)?;
        }
        Ok(())
    }

    /// Load the row of `entity_name`'s own table with the given identifier.
    pub fn get(&self, entity_name: &str, id: &[Value]) -> Result<Option<Row>> {
        let class = self.class(entity_name)?;
        if id.len() != class.id.len() {
            return Err(invalid_mapping(format!(
                "'{entity_name}' has {} identifier columns, got {} values",
                class.id.len(),
                id.len()
            )));
        }
        let predicate = class
            .id
            .iter()
            .map(|p| format!("{} = ?", quote_ident(p.column_name())))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT * FROM {} WHERE {}", quote_ident(&class.table), predicate);
        Ok(self.query(&sql, id)?.into_iter().next())
    }

    /// Every row of every mapped entity table, tagged with its entity name.
    pub fn query_all_entities(&self) -> Result<Vec<(String, Row)>> {
        let mut found = Vec::new();
        for class in self.inner.factory.config.class_mappings() {
            let sql = format!("SELECT * FROM {}", quote_ident(&class.table));
            for row in self.query(&sql, &[])? {
                found.push((class.entity_name.clone(), row));
            }
        }
        Ok(found)
    }

    /// Number of rows in `entity_name`'s table.
    pub fn count(&self, entity_name: &str) -> Result<u64> {
        let class = self.class(entity_name)?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&class.table));
        let rows = self.query(&sql, &[])?;
        let count = rows
            .first()
            .and_then(|r| r.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Delete every row of every mapped table, returning the rows removed.
    pub fn delete_all(&self) -> Result<u64> {
        let config = &self.inner.factory.config;
        let tables = config
            .collection_mappings()
            .iter()
            .map(|c| c.table.as_str())
            .chain(config.class_mappings().iter().rev().map(|c| c.table.as_str()));
        let mut deleted = 0;
        for table in tables {
            deleted += self.execute(&format!("DELETE FROM {}", quote_ident(table)), &[])?;
        }
        Ok(deleted)
    }

    /// Close the session, giving its connection back through the provider.
    ///
    /// Closing a closed session is a no-op.
    pub fn close(&self) -> Result<()> {
        let connection = {
            let mut state = self.inner.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.connection.take()
        };
        tracing::trace!(session = %self.inner.id, "Session closed");
        match connection {
            Some(conn) => self.inner.factory.provider.close_connection(&conn),
            None => Ok(()),
        }
    }

    fn prepare(&self, sql: &str) -> String {
        match &self.inner.interceptor {
            Some(interceptor) => interceptor.on_prepare_statement(sql),
            None => sql.to_string(),
        }
    }

    fn class(&self, entity_name: &str) -> Result<&ClassMapping> {
        self.inner
            .factory
            .config
            .class_mapping(entity_name)
            .ok_or_else(|| invalid_mapping(format!("no mapped entity '{entity_name}'")))
    }

    /// Root-first list of the classes an entity is stored in.
    fn hierarchy(&self, entity_name: &str) -> Result<Vec<&ClassMapping>> {
        let mut chain = vec![self.class(entity_name)?];
        while let Some(parent) = chain.last().copied().and_then(|c| c.superclass.as_deref()) {
            chain.push(self.class(parent)?);
        }
        chain.reverse();
        Ok(chain)
    }
}

fn invalid_mapping(message: String) -> Error {
    Error::Mapping(MappingError {
        kind: MappingErrorKind::Invalid,
        resource: None,
        message,
    })
}

/// A non-owning reference to a [`Session`].
#[derive(Clone, Default)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl fmt::Debug for WeakSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSession")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl WeakSession {
    /// Get the session back if any strong handle still exists.
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }

    /// Whether the session is still alive and open.
    pub fn is_open(&self) -> bool {
        self.upgrade().is_some_and(|s| s.is_open())
    }
}
