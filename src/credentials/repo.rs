//! Postgres-backed credential store.
//!
//! Legacy and current rows live in the same `security_keys` relation.
//! `format_version` tells them apart: 0 for rows that still carry only the
//! raw registration blob, 1 for rows in the current layout.

use crate::credentials::models::{
    CredentialRecord, CredentialUpdate, LegacyCredentialRecord, MigratedColumns,
    NewCredentialRecord,
};
use crate::credentials::store::{CredentialStore, MigrationStore};
use crate::db::query_span;
use crate::error::{is_unique_violation, StoreError};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::Instrument;

const FORMAT_LEGACY: i16 = 0;
const FORMAT_CURRENT: i16 = 1;

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS security_keys (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        raw BYTEA,
        sign_counter BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "ALTER TABLE security_keys ADD COLUMN IF NOT EXISTS key_id BYTEA",
    "ALTER TABLE security_keys ADD COLUMN IF NOT EXISTS public_key BYTEA",
    "ALTER TABLE security_keys ADD COLUMN IF NOT EXISTS attestation_type TEXT",
    "ALTER TABLE security_keys ADD COLUMN IF NOT EXISTS aaguid BYTEA",
    "ALTER TABLE security_keys ADD COLUMN IF NOT EXISTS format_version SMALLINT NOT NULL DEFAULT 0",
    "CREATE INDEX IF NOT EXISTS security_keys_user_id_idx ON security_keys (user_id)",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS security_keys_user_key_id_idx
        ON security_keys (user_id, key_id) WHERE key_id IS NOT NULL
    ",
];

const SELECT_CURRENT: &str = r"
    SELECT id, user_id, name, key_id, public_key, attestation_type, aaguid,
           sign_counter, created_at, updated_at
    FROM security_keys
";

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: i64) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM security_keys WHERE id = $1 AND format_version = $2";
        let row = sqlx::query(query)
            .bind(id)
            .bind(FORMAT_CURRENT)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.is_some())
    }
}

fn map_write_error(err: sqlx::Error, user_id: Option<i64>) -> StoreError {
    if is_unique_violation(&err) {
        let owner = user_id.map_or_else(String::new, |id| format!(" for user {id}"));
        StoreError::Duplicate(format!("key id already enrolled{owner}"))
    } else {
        StoreError::Database(err)
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get(&self, id: i64) -> Result<CredentialRecord, StoreError> {
        let query = format!("{SELECT_CURRENT} WHERE id = $1 AND format_version = $2");
        sqlx::query_as::<_, CredentialRecord>(&query)
            .bind(id)
            .bind(FORMAT_CURRENT)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?
            .ok_or(StoreError::NotExist { id })
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<CredentialRecord>, StoreError> {
        let query =
            format!("{SELECT_CURRENT} WHERE user_id = $1 AND format_version = $2 ORDER BY id");
        Ok(sqlx::query_as::<_, CredentialRecord>(&query)
            .bind(user_id)
            .bind(FORMAT_CURRENT)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?)
    }

    async fn insert(&self, record: NewCredentialRecord) -> Result<i64, StoreError> {
        let query = r"
            INSERT INTO security_keys
                (user_id, name, key_id, public_key, attestation_type, aaguid,
                 sign_counter, format_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
        ";
        sqlx::query_scalar::<_, i64>(query)
            .bind(record.user_id)
            .bind(&record.name)
            .bind(&record.key_id)
            .bind(&record.public_key)
            .bind(&record.attestation_type)
            .bind(record.aaguid.as_bytes().as_slice())
            .bind(i64::from(record.sign_counter))
            .bind(FORMAT_CURRENT)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|e| map_write_error(e, Some(record.user_id)))
    }

    async fn update_fields(&self, id: i64, update: CredentialUpdate) -> Result<(), StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE security_keys SET updated_at = NOW()");
        if let Some(public_key) = &update.public_key {
            builder.push(", public_key = ").push_bind(public_key.clone());
        }
        if let Some(attestation_type) = &update.attestation_type {
            builder
                .push(", attestation_type = ")
                .push_bind(attestation_type.clone());
        }
        if let Some(aaguid) = &update.aaguid {
            builder.push(", aaguid = ").push_bind(aaguid.as_bytes().to_vec());
        }
        if let Some(counter) = update.sign_counter {
            builder
                .push(", sign_counter = ")
                .push_bind(i64::from(counter));
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND format_version = ")
            .push_bind(FORMAT_CURRENT);
        // Conditional write keeps the counter monotonic under concurrent assertions.
        if let Some(counter) = update.sign_counter {
            builder
                .push(" AND sign_counter < ")
                .push_bind(i64::from(counter));
        }

        let statement = builder.sql().to_string();
        let result = builder
            .build()
            .execute(&self.pool)
            .instrument(query_span("UPDATE", &statement))
            .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if update.sign_counter.is_some() && self.exists(id).await? {
            Err(StoreError::CounterRegression { id })
        } else {
            Err(StoreError::NotExist { id })
        }
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let query = "DELETE FROM security_keys WHERE id = $1 AND format_version = $2";
        let result = sqlx::query(query)
            .bind(id)
            .bind(FORMAT_CURRENT)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MigrationStore for PgCredentialStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .instrument(query_span("DDL", statement))
                .await?;
        }
        Ok(())
    }

    async fn legacy_page(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<LegacyCredentialRecord>, StoreError> {
        let query = r"
            SELECT id, raw, sign_counter
            FROM security_keys
            WHERE id > $1 AND format_version = $2
            ORDER BY id
            LIMIT $3
        ";
        Ok(sqlx::query_as::<_, LegacyCredentialRecord>(query)
            .bind(after_id)
            .bind(FORMAT_LEGACY)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?)
    }

    async fn write_migrated(&self, id: i64, columns: MigratedColumns) -> Result<(), StoreError> {
        let query = r"
            UPDATE security_keys
            SET key_id = $2, public_key = $3, attestation_type = $4, aaguid = $5,
                format_version = $6, updated_at = NOW()
            WHERE id = $1 AND format_version = $7
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(&columns.key_id)
            .bind(&columns.public_key)
            .bind(&columns.attestation_type)
            .bind(columns.aaguid.as_bytes().as_slice())
            .bind(FORMAT_CURRENT)
            .bind(FORMAT_LEGACY)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|e| map_write_error(e, None))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotExist { id });
        }
        Ok(())
    }
}
