use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

pub const TOKEN_TYPE_BEARER: &str = "bearer";
pub const RESPONSE_TYPE_CODE: &str = "code";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Application {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub client_id: Uuid,
    /// Argon2 PHC string; the raw secret is never stored.
    pub client_secret_hash: String,
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl OAuth2Application {
    /// Exact, byte-for-byte match against the registered URIs.
    #[must_use]
    pub fn contains_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

impl<'r> FromRow<'r, PgRow> for OAuth2Application {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            name: row.try_get("name")?,
            client_id: row.try_get("client_id")?,
            client_secret_hash: row.try_get("client_secret_hash")?,
            redirect_uris: row.try_get("redirect_uris")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub owner_id: i64,
    pub name: String,
    pub client_id: Uuid,
    pub client_secret_hash: String,
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Grant {
    pub id: i64,
    pub application_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for OAuth2Grant {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            application_id: row.try_get("application_id")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Stored form of an authorization code. `code_hash` is SHA-256 of the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code_hash: Vec<u8>,
    pub grant_id: i64,
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Stored form of an access token. `token_hash` is SHA-256 of the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token_hash: Vec<u8>,
    pub user_id: i64,
    pub grant_id: i64,
    pub valid_until: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccessToken {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            token_hash: row.try_get("token_hash")?,
            user_id: row.try_get("user_id")?,
            grant_id: row.try_get("grant_id")?,
            valid_until: row.try_get("valid_until")?,
        })
    }
}

/// Token endpoint success body. The schema is registered by the web layer's
/// OpenAPI document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the token expires.
    pub expires_in: i64,
}
