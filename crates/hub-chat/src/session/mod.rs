//! Session context: the bearer credential and the identity it authenticates.
//!
//! A [`SessionContext`] is passed explicitly to the REST client and to every
//! channel `open`. Clearing or replacing the credential notifies every
//! subscriber, which is how open channels learn they must close: a socket
//! cannot be re-authenticated once bound.

mod error;
mod store;

pub use error::{SessionError, SessionResult};
pub use store::SessionStore;

use hub_protocol::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Bearer token plus identity claims.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub token: String,
    pub identity: Identity,
}

impl SessionCredential {
    pub fn new(token: impl Into<String>, identity: Identity) -> Self {
        Self {
            token: token.into(),
            identity,
        }
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Receiver side of the invalidation hook.
pub type SessionWatch = watch::Receiver<Option<Arc<SessionCredential>>>;

/// Shared, cheaply cloneable session handle.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<watch::Sender<Option<Arc<SessionCredential>>>>,
}

impl SessionContext {
    /// A context with nobody signed in.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { inner: Arc::new(tx) }
    }

    /// A context already holding `credential`.
    pub fn signed_in(credential: SessionCredential) -> Self {
        let (tx, _) = watch::channel(Some(Arc::new(credential)));
        Self { inner: Arc::new(tx) }
    }

    /// Install a new credential. Subscribers bound to the previous one are
    /// notified.
    pub fn sign_in(&self, credential: SessionCredential) {
        self.inner.send_replace(Some(Arc::new(credential)));
    }

    /// Drop the credential. Every subscriber is notified.
    pub fn invalidate(&self) {
        let previous = self.inner.send_replace(None);
        if previous.is_some() {
            log::info!("Session invalidated");
        }
    }

    pub fn current(&self) -> Option<Arc<SessionCredential>> {
        self.inner.borrow().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.borrow().as_ref().map(|c| c.token.clone())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.borrow().as_ref().map(|c| c.identity.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.borrow().is_some()
    }

    /// Subscribe to credential changes. The current value is marked seen, so
    /// `changed()` resolves only on the next sign-in or invalidation.
    pub fn subscribe(&self) -> SessionWatch {
        self.inner.subscribe()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("identity", &self.identity())
            .finish()
    }
}

/// Resolves when the watched credential changes. A context that has been
/// dropped entirely can no longer change, so this never resolves for it.
pub(crate) async fn invalidated(watch: &mut SessionWatch) {
    if watch.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
