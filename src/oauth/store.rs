use crate::error::StoreError;
use crate::oauth::models::{
    AccessToken, AuthorizationCode, NewApplication, OAuth2Application, OAuth2Grant,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence for applications, grants, codes and access tokens.
#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn create_application(
        &self,
        application: NewApplication,
    ) -> Result<OAuth2Application, StoreError>;

    async fn application_by_client_id(
        &self,
        client_id: &Uuid,
    ) -> Result<Option<OAuth2Application>, StoreError>;

    async fn grant_for_user(
        &self,
        application_id: i64,
        user_id: i64,
    ) -> Result<Option<OAuth2Grant>, StoreError>;

    /// Returns the existing grant for the pair if there is one.
    async fn create_grant(
        &self,
        application_id: i64,
        user_id: i64,
    ) -> Result<OAuth2Grant, StoreError>;

    async fn insert_authorization_code(&self, code: AuthorizationCode) -> Result<(), StoreError>;

    /// Marks the code used if it is unused, unexpired at `now`, and was
    /// issued for `grant_id` and `redirect_uri`. Returns whether it was
    /// consumed; at most one caller ever sees `true` for a code.
    async fn consume_authorization_code(
        &self,
        code_hash: &[u8],
        grant_id: i64,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn insert_access_token(&self, token: AccessToken) -> Result<(), StoreError>;

    async fn access_token_by_hash(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<AccessToken>, StoreError>;
}
