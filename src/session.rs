//! Expiring, typed session state for ceremonies and OAuth consent.
//!
//! The transport layer owns the real session; this module defines the
//! contract the core needs from it plus an in-process implementation that
//! prunes entries after a fixed TTL.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::Mutex;

pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 300;

/// Opaque identifier of a principal's session.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Session ids are bearer material.
impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSlot {
    Registration,
    Assertion,
    OAuthConsent,
}

/// The `{client_id, redirect_uri, state}` triple a consent form must echo back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentBinding {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValue {
    PendingRegistration { name: String, state: Vec<u8> },
    PendingAssertion { state: Vec<u8> },
    Consent(ConsentBinding),
}

impl SessionValue {
    #[must_use]
    pub const fn slot(&self) -> SessionSlot {
        match self {
            Self::PendingRegistration { .. } => SessionSlot::Registration,
            Self::PendingAssertion { .. } => SessionSlot::Assertion,
            Self::Consent(_) => SessionSlot::OAuthConsent,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session backend unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(
        &self,
        key: &SessionKey,
        slot: SessionSlot,
    ) -> Result<Option<SessionValue>, SessionError>;

    /// Stores `value` in the slot it belongs to, replacing any previous value.
    async fn set(&self, key: &SessionKey, value: SessionValue) -> Result<(), SessionError>;

    async fn clear(&self, key: &SessionKey, slot: SessionSlot) -> Result<(), SessionError>;

    /// Reads and clears a slot. Backends with an atomic pop should override this.
    async fn take(
        &self,
        key: &SessionKey,
        slot: SessionSlot,
    ) -> Result<Option<SessionValue>, SessionError> {
        let value = self.get(key, slot).await?;
        if value.is_some() {
            self.clear(key, slot).await?;
        }
        Ok(value)
    }
}

struct Entry {
    value: SessionValue,
    created_at: Instant,
}

pub struct MemorySessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<(SessionKey, SessionSlot), Entry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn prune(entries: &mut HashMap<(SessionKey, SessionSlot), Entry>, ttl: Duration) {
        entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(
        &self,
        key: &SessionKey,
        slot: SessionSlot,
    ) -> Result<Option<SessionValue>, SessionError> {
        let mut entries = self.entries.lock().await;
        Self::prune(&mut entries, self.ttl);
        Ok(entries
            .get(&(key.clone(), slot))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &SessionKey, value: SessionValue) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().await;
        Self::prune(&mut entries, self.ttl);
        entries.insert(
            (key.clone(), value.slot()),
            Entry {
                value,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn clear(&self, key: &SessionKey, slot: SessionSlot) -> Result<(), SessionError> {
        self.entries.lock().await.remove(&(key.clone(), slot));
        Ok(())
    }

    async fn take(
        &self,
        key: &SessionKey,
        slot: SessionSlot,
    ) -> Result<Option<SessionValue>, SessionError> {
        let mut entries = self.entries.lock().await;
        Self::prune(&mut entries, self.ttl);
        Ok(entries.remove(&(key.clone(), slot)).map(|entry| entry.value))
    }
}
