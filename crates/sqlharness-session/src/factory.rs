//! The session factory.

use crate::interceptor::Interceptor;
use crate::metadata::ClassMetadata;
use crate::session::Session;
use sqlharness_core::{Configuration, ConnectionProvider, Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct FactoryInner {
    pub(crate) config: Arc<Configuration>,
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    metadata: BTreeMap<String, ClassMetadata>,
    closed: AtomicBool,
}

/// Produces sessions against one configuration and one connection provider.
///
/// Cloning a factory yields another handle to the same factory.
#[derive(Clone)]
pub struct SessionFactory {
    inner: Arc<FactoryInner>,
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("connection_string", &self.inner.provider.connection_string())
            .field("entities", &self.inner.metadata.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionFactory {
    /// Build a factory.
    #[tracing::instrument(level = "debug", skip_all, fields(connection_string = %provider.connection_string()))]
    pub fn build(config: Arc<Configuration>, provider: Arc<dyn ConnectionProvider>) -> Result<Self> {
        let metadata = config
            .class_mappings()
            .iter()
            .map(|m| (m.entity_name.clone(), ClassMetadata::from_mapping(m)))
            .collect::<BTreeMap<_, _>>();
        tracing::debug!(entities = metadata.len(), "Session factory built");

        Ok(Self {
            inner: Arc::new(FactoryInner {
                config,
                provider,
                metadata,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open a session.
    pub fn open_session(&self) -> Result<Session> {
        self.ensure_open()?;
        Ok(Session::new(Arc::clone(&self.inner), None))
    }

    /// Open a session whose statements pass through `interceptor`.
    pub fn open_session_with(&self, interceptor: Arc<dyn Interceptor>) -> Result<Session> {
        self.ensure_open()?;
        Ok(Session::new(Arc::clone(&self.inner), Some(interceptor)))
    }

    /// Metadata for every mapped entity, keyed by entity name.
    pub fn all_class_metadata(&self) -> &BTreeMap<String, ClassMetadata> {
        &self.inner.metadata
    }

    pub fn class_metadata(&self, entity_name: &str) -> Option<&ClassMetadata> {
        self.inner.metadata.get(entity_name)
    }

    /// The provider sessions acquire connections from.
    pub fn connection_provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.inner.provider
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.inner.config
    }

    /// Close the factory. Closing twice is a no-op.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session factory closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Custom("session factory is closed".to_string()))
        } else {
            Ok(())
        }
    }
}
