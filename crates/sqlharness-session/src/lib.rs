//! Session factory and sessions for SQLHarness.
//!
//! `sqlharness-session` is the thin unit-of-work layer fixtures drive:
//!
//! - **Session factory**: built once per fixture from a [`Configuration`] and a
//!   [`ConnectionProvider`]; exposes class metadata and opens sessions.
//! - **Session**: a cloneable handle bound to at most one physical
//!   connection, acquired lazily from the factory's provider.
//! - **Weak sessions**: observe a session without keeping it alive, which is
//!   how leak detection watches the last opened session.
//!
//! Closing a session gives its connection back through the provider. Dropping
//! the last handle of a session that was never closed closes the connection
//! directly, bypassing the provider.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::build(config, provider)?;
//! let session = factory.open_session()?;
//! let tx = session.begin_transaction()?;
//! session.save("Parent", &[("id", Value::BigInt(1)), ("name", "Bob".into())])?;
//! tx.commit()?;
//! session.close()?;
//! ```
//!
//! [`Configuration`]: sqlharness_core::Configuration
//! [`ConnectionProvider`]: sqlharness_core::ConnectionProvider

pub mod factory;
pub mod interceptor;
pub mod metadata;
pub mod session;

pub use factory::SessionFactory;
pub use interceptor::Interceptor;
pub use metadata::ClassMetadata;
pub use session::{Session, SessionId, WeakSession};
