use crate::credentials::{adapter, Credential, CredentialStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Maximum length of a varint-encoded u64.
const MAX_VARINT_LEN64: usize = 10;

/// What a ceremony needs to know about the account enrolling or asserting.
#[async_trait]
pub trait WebAuthnUser: Send + Sync {
    /// Stable opaque user handle handed to the authenticator.
    fn identity_bytes(&self) -> Vec<u8>;

    fn display_name(&self) -> String;

    fn secondary_name(&self) -> String;

    fn icon_ref(&self) -> String;

    async fn credentials(&self) -> Result<Vec<Credential>, StoreError>;

    /// Persists a verified credential under `name` and returns its record id.
    async fn add_credential(&self, name: &str, credential: &Credential) -> Result<i64, StoreError>;
}

/// Account attributes supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub avatar: String,
}

impl UserIdentity {
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            full_name: String::new(),
            avatar: String::new(),
        }
    }

    #[must_use]
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = avatar.into();
        self
    }
}

/// Unsigned LEB128 of the id, zero-padded to the maximum varint width.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn user_handle(id: i64) -> Vec<u8> {
    let mut value = u64::from_ne_bytes(id.to_ne_bytes());
    let mut buf = vec![0u8; MAX_VARINT_LEN64];
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value & 0x7f) as u8 | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    buf
}

/// A [`UserIdentity`] whose credentials live in a [`CredentialStore`].
pub struct StoredUser {
    identity: UserIdentity,
    store: Arc<dyn CredentialStore>,
}

impl StoredUser {
    #[must_use]
    pub fn new(identity: UserIdentity, store: Arc<dyn CredentialStore>) -> Self {
        Self { identity, store }
    }

    #[must_use]
    pub const fn identity(&self) -> &UserIdentity {
        &self.identity
    }
}

#[async_trait]
impl WebAuthnUser for StoredUser {
    fn identity_bytes(&self) -> Vec<u8> {
        user_handle(self.identity.id)
    }

    fn display_name(&self) -> String {
        if self.identity.full_name.trim().is_empty() {
            self.identity.name.clone()
        } else {
            self.identity.full_name.clone()
        }
    }

    fn secondary_name(&self) -> String {
        self.identity.name.clone()
    }

    fn icon_ref(&self) -> String {
        self.identity.avatar.clone()
    }

    async fn credentials(&self) -> Result<Vec<Credential>, StoreError> {
        let records = self.store.list_by_user(self.identity.id).await?;
        Ok(adapter::to_credentials(&records))
    }

    async fn add_credential(&self, name: &str, credential: &Credential) -> Result<i64, StoreError> {
        self.store
            .insert(adapter::to_new_record(self.identity.id, name, credential))
            .await
    }
}
