//! Postgres-backed OAuth store.

use crate::db::query_span;
use crate::error::{is_unique_violation, StoreError};
use crate::oauth::models::{
    AccessToken, AuthorizationCode, NewApplication, OAuth2Application, OAuth2Grant,
};
use crate::oauth::store::OAuthStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS oauth2_application (
        id BIGSERIAL PRIMARY KEY,
        owner_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        client_id UUID NOT NULL UNIQUE,
        client_secret_hash TEXT NOT NULL,
        redirect_uris TEXT[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_grant (
        id BIGSERIAL PRIMARY KEY,
        application_id BIGINT NOT NULL REFERENCES oauth2_application (id) ON DELETE CASCADE,
        user_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (application_id, user_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_authorization_code (
        code_hash BYTEA PRIMARY KEY,
        grant_id BIGINT NOT NULL REFERENCES oauth2_grant (id) ON DELETE CASCADE,
        redirect_uri TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        used BOOLEAN NOT NULL DEFAULT FALSE
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS oauth2_access_token (
        token_hash BYTEA PRIMARY KEY,
        user_id BIGINT NOT NULL,
        grant_id BIGINT NOT NULL REFERENCES oauth2_grant (id) ON DELETE CASCADE,
        valid_until TIMESTAMPTZ NOT NULL
    )
    ",
];

#[derive(Clone)]
pub struct PgOAuthStore {
    pool: PgPool,
}

impl PgOAuthStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the OAuth tables if they are missing.
    ///
    /// # Errors
    /// Returns [`StoreError::Database`] if a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .instrument(query_span("DDL", statement))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OAuthStore for PgOAuthStore {
    async fn create_application(
        &self,
        application: NewApplication,
    ) -> Result<OAuth2Application, StoreError> {
        let query = r"
            INSERT INTO oauth2_application
                (owner_id, name, client_id, client_secret_hash, redirect_uris)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, owner_id, name, client_id, client_secret_hash, redirect_uris, created_at
        ";
        sqlx::query_as::<_, OAuth2Application>(query)
            .bind(application.owner_id)
            .bind(&application.name)
            .bind(application.client_id)
            .bind(&application.client_secret_hash)
            .bind(&application.redirect_uris)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate(format!(
                        "client id {} already registered",
                        application.client_id
                    ))
                } else {
                    StoreError::Database(err)
                }
            })
    }

    async fn application_by_client_id(
        &self,
        client_id: &Uuid,
    ) -> Result<Option<OAuth2Application>, StoreError> {
        let query = r"
            SELECT id, owner_id, name, client_id, client_secret_hash, redirect_uris, created_at
            FROM oauth2_application
            WHERE client_id = $1
        ";
        Ok(sqlx::query_as::<_, OAuth2Application>(query)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?)
    }

    async fn grant_for_user(
        &self,
        application_id: i64,
        user_id: i64,
    ) -> Result<Option<OAuth2Grant>, StoreError> {
        let query = r"
            SELECT id, application_id, user_id, created_at
            FROM oauth2_grant
            WHERE application_id = $1 AND user_id = $2
        ";
        Ok(sqlx::query_as::<_, OAuth2Grant>(query)
            .bind(application_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?)
    }

    async fn create_grant(
        &self,
        application_id: i64,
        user_id: i64,
    ) -> Result<OAuth2Grant, StoreError> {
        let query = r"
            INSERT INTO oauth2_grant (application_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (application_id, user_id) DO NOTHING
        ";
        sqlx::query(query)
            .bind(application_id)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        self.grant_for_user(application_id, user_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt("grant vanished after insert".to_string()))
    }

    async fn insert_authorization_code(&self, code: AuthorizationCode) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO oauth2_authorization_code (code_hash, grant_id, redirect_uri, expires_at, used)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(&code.code_hash)
            .bind(code.grant_id)
            .bind(&code.redirect_uri)
            .bind(code.expires_at)
            .bind(code.used)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &[u8],
        grant_id: i64,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE oauth2_authorization_code
            SET used = TRUE
            WHERE code_hash = $1
              AND grant_id = $2
              AND redirect_uri = $3
              AND used = FALSE
              AND expires_at > $4
        ";
        let result = sqlx::query(query)
            .bind(code_hash)
            .bind(grant_id)
            .bind(redirect_uri)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_access_token(&self, token: AccessToken) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO oauth2_access_token (token_hash, user_id, grant_id, valid_until)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&token.token_hash)
            .bind(token.user_id)
            .bind(token.grant_id)
            .bind(token.valid_until)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn access_token_by_hash(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<AccessToken>, StoreError> {
        let query = r"
            SELECT token_hash, user_id, grant_id, valid_until
            FROM oauth2_access_token
            WHERE token_hash = $1
        ";
        Ok(sqlx::query_as::<_, AccessToken>(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?)
    }
}
