use crate::error::StoreError;
use crate::oauth::models::{
    AccessToken, AuthorizationCode, NewApplication, OAuth2Application, OAuth2Grant,
};
use crate::oauth::store::OAuthStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    last_application_id: i64,
    last_grant_id: i64,
    applications: Vec<OAuth2Application>,
    grants: Vec<OAuth2Grant>,
    codes: HashMap<Vec<u8>, AuthorizationCode>,
    tokens: HashMap<Vec<u8>, AccessToken>,
}

impl Inner {
    /// Drops codes that can no longer be redeemed and expired tokens.
    fn prune(&mut self, now: DateTime<Utc>) {
        self.codes.retain(|_, code| !code.used && code.expires_at > now);
        self.tokens.retain(|_, token| token.valid_until > now);
    }
}

/// In-process [`OAuthStore`] for tests and local development.
#[derive(Default)]
pub struct MemoryOAuthStore {
    inner: Mutex<Inner>,
}

impl MemoryOAuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OAuthStore for MemoryOAuthStore {
    async fn create_application(
        &self,
        application: NewApplication,
    ) -> Result<OAuth2Application, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .applications
            .iter()
            .any(|app| app.client_id == application.client_id)
        {
            return Err(StoreError::Duplicate(format!(
                "client id {} already registered",
                application.client_id
            )));
        }
        inner.last_application_id += 1;
        let created = OAuth2Application {
            id: inner.last_application_id,
            owner_id: application.owner_id,
            name: application.name,
            client_id: application.client_id,
            client_secret_hash: application.client_secret_hash,
            redirect_uris: application.redirect_uris,
            created_at: Utc::now(),
        };
        inner.applications.push(created.clone());
        Ok(created)
    }

    async fn application_by_client_id(
        &self,
        client_id: &Uuid,
    ) -> Result<Option<OAuth2Application>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .applications
            .iter()
            .find(|app| &app.client_id == client_id)
            .cloned())
    }

    async fn grant_for_user(
        &self,
        application_id: i64,
        user_id: i64,
    ) -> Result<Option<OAuth2Grant>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .grants
            .iter()
            .find(|g| g.application_id == application_id && g.user_id == user_id)
            .cloned())
    }

    async fn create_grant(
        &self,
        application_id: i64,
        user_id: i64,
    ) -> Result<OAuth2Grant, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .grants
            .iter()
            .find(|g| g.application_id == application_id && g.user_id == user_id)
        {
            return Ok(existing.clone());
        }
        inner.last_grant_id += 1;
        let grant = OAuth2Grant {
            id: inner.last_grant_id,
            application_id,
            user_id,
            created_at: Utc::now(),
        };
        inner.grants.push(grant.clone());
        Ok(grant)
    }

    async fn insert_authorization_code(&self, code: AuthorizationCode) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.prune(Utc::now());
        inner.codes.insert(code.code_hash.clone(), code);
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &[u8],
        grant_id: i64,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(code) = inner.codes.get_mut(code_hash) else {
            return Ok(false);
        };
        if code.used
            || code.grant_id != grant_id
            || code.redirect_uri != redirect_uri
            || code.expires_at <= now
        {
            return Ok(false);
        }
        code.used = true;
        Ok(true)
    }

    async fn insert_access_token(&self, token: AccessToken) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.prune(Utc::now());
        inner.tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn access_token_by_hash(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.inner.lock().await.tokens.get(token_hash).cloned())
    }
}
