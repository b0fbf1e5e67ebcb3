use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::fmt;
use thiserror::Error;

pub const AAGUID_LEN: usize = 16;
pub const ATTESTATION_NONE: &str = "none";

/// Authenticator model identifier. All-zero when the model is unknown.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Aaguid([u8; AAGUID_LEN]);

#[derive(Debug, Error)]
#[error("aaguid must be {AAGUID_LEN} bytes, got {0}")]
pub struct AaguidLengthError(pub usize);

impl Aaguid {
    pub const ZERO: Self = Self([0; AAGUID_LEN]);

    #[must_use]
    pub const fn new(bytes: [u8; AAGUID_LEN]) -> Self {
        Self(bytes)
    }

    /// # Errors
    /// Returns an error unless `bytes` is exactly 16 bytes long.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, AaguidLengthError> {
        <[u8; AAGUID_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| AaguidLengthError(bytes.len()))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; AAGUID_LEN] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; AAGUID_LEN]
    }
}

impl fmt::Debug for Aaguid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aaguid(")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// One enrolled authenticator, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub key_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub attestation_type: String,
    pub aaguid: Aaguid,
    pub sign_counter: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn column_error(column: &str, err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    }
}

impl<'r> FromRow<'r, PgRow> for CredentialRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let aaguid: Vec<u8> = row.try_get("aaguid")?;
        let sign_counter: i64 = row.try_get("sign_counter")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            key_id: row.try_get("key_id")?,
            public_key: row.try_get("public_key")?,
            attestation_type: row.try_get("attestation_type")?,
            aaguid: Aaguid::try_from_slice(&aaguid).map_err(|e| column_error("aaguid", e))?,
            sign_counter: u32::try_from(sign_counter)
                .map_err(|e| column_error("sign_counter", e))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Values for a record about to be inserted; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredentialRecord {
    pub user_id: i64,
    pub name: String,
    pub key_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub attestation_type: String,
    pub aaguid: Aaguid,
    pub sign_counter: u32,
}

/// Pre-migration row: an opaque registration blob plus the counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCredentialRecord {
    pub id: i64,
    pub raw: Vec<u8>,
    pub counter: u32,
}

impl<'r> FromRow<'r, PgRow> for LegacyCredentialRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let counter: i64 = row.try_get("sign_counter")?;
        Ok(Self {
            id: row.try_get("id")?,
            raw: row.try_get("raw")?,
            counter: u32::try_from(counter).map_err(|e| column_error("sign_counter", e))?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticator {
    pub aaguid: Aaguid,
    pub sign_counter: u32,
}

/// Protocol-neutral credential exchanged with the ceremony layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub attestation_type: String,
    pub authenticator: Authenticator,
}

/// Column subset written by `update_fields`. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub public_key: Option<Vec<u8>>,
    pub attestation_type: Option<String>,
    pub aaguid: Option<Aaguid>,
    pub sign_counter: Option<u32>,
}

impl CredentialUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.public_key.is_none()
            && self.attestation_type.is_none()
            && self.aaguid.is_none()
            && self.sign_counter.is_none()
    }
}

/// Columns rewritten when a legacy row is migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedColumns {
    pub key_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub attestation_type: String,
    pub aaguid: Aaguid,
}
