//! In-process credential store used by tests and local development.
//!
//! Legacy rows share the id sequence with current rows, mirroring the single
//! evolving relation the Postgres store uses.

use crate::credentials::models::{
    CredentialRecord, CredentialUpdate, LegacyCredentialRecord, MigratedColumns,
    NewCredentialRecord,
};
use crate::credentials::store::{CredentialStore, MigrationStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct LegacyRow {
    user_id: i64,
    name: String,
    raw: Vec<u8>,
    counter: u32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum Row {
    Legacy(LegacyRow),
    Current(CredentialRecord),
}

#[derive(Default)]
struct Inner {
    last_id: i64,
    rows: BTreeMap<i64, Row>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn key_taken(&self, user_id: i64, key_id: &[u8], except: Option<i64>) -> bool {
        self.rows.iter().any(|(id, row)| match row {
            Row::Current(r) => Some(*id) != except && r.user_id == user_id && r.key_id == key_id,
            Row::Legacy(_) => false,
        })
    }

    fn current_mut(&mut self, id: i64) -> Result<&mut CredentialRecord, StoreError> {
        match self.rows.get_mut(&id) {
            Some(Row::Current(record)) => Ok(record),
            _ => Err(StoreError::NotExist { id }),
        }
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Inner>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row in the pre-migration layout and returns its id.
    pub async fn insert_legacy(
        &self,
        user_id: i64,
        name: &str,
        raw: Vec<u8>,
        counter: u32,
    ) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.rows.insert(
            id,
            Row::Legacy(LegacyRow {
                user_id,
                name: name.to_string(),
                raw,
                counter,
                created_at: Utc::now(),
            }),
        );
        id
    }

    pub async fn legacy_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .rows
            .values()
            .filter(|row| matches!(row, Row::Legacy(_)))
            .count()
    }

    /// Every current-layout record, ascending by id.
    pub async fn snapshot(&self) -> Vec<CredentialRecord> {
        self.inner
            .lock()
            .await
            .rows
            .values()
            .filter_map(|row| match row {
                Row::Current(record) => Some(record.clone()),
                Row::Legacy(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, id: i64) -> Result<CredentialRecord, StoreError> {
        match self.inner.lock().await.rows.get(&id) {
            Some(Row::Current(record)) => Ok(record.clone()),
            _ => Err(StoreError::NotExist { id }),
        }
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<CredentialRecord>, StoreError> {
        Ok(self
            .snapshot()
            .await
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .collect())
    }

    async fn insert(&self, record: NewCredentialRecord) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.key_taken(record.user_id, &record.key_id, None) {
            return Err(StoreError::Duplicate(format!(
                "key id already enrolled for user {}",
                record.user_id
            )));
        }
        let id = inner.next_id();
        let now = Utc::now();
        inner.rows.insert(
            id,
            Row::Current(CredentialRecord {
                id,
                user_id: record.user_id,
                name: record.name,
                key_id: record.key_id,
                public_key: record.public_key,
                attestation_type: record.attestation_type,
                aaguid: record.aaguid,
                sign_counter: record.sign_counter,
                created_at: now,
                updated_at: now,
            }),
        );
        Ok(id)
    }

    async fn update_fields(&self, id: i64, update: CredentialUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner.current_mut(id)?;
        if let Some(counter) = update.sign_counter {
            if counter <= record.sign_counter {
                return Err(StoreError::CounterRegression { id });
            }
            record.sign_counter = counter;
        }
        if let Some(public_key) = update.public_key {
            record.public_key = public_key;
        }
        if let Some(attestation_type) = update.attestation_type {
            record.attestation_type = attestation_type;
        }
        if let Some(aaguid) = update.aaguid {
            record.aaguid = aaguid;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.rows.get(&id), Some(Row::Current(_))) {
            return Ok(false);
        }
        Ok(inner.rows.remove(&id).is_some())
    }
}

#[async_trait]
impl MigrationStore for MemoryCredentialStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn legacy_page(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<LegacyCredentialRecord>, StoreError> {
        let take = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .inner
            .lock()
            .await
            .rows
            .range(after_id.saturating_add(1)..)
            .filter_map(|(id, row)| match row {
                Row::Legacy(legacy) => Some(LegacyCredentialRecord {
                    id: *id,
                    raw: legacy.raw.clone(),
                    counter: legacy.counter,
                }),
                Row::Current(_) => None,
            })
            .take(take)
            .collect())
    }

    async fn write_migrated(&self, id: i64, columns: MigratedColumns) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let legacy = match inner.rows.get(&id) {
            Some(Row::Legacy(legacy)) => legacy.clone(),
            _ => return Err(StoreError::NotExist { id }),
        };
        if inner.key_taken(legacy.user_id, &columns.key_id, Some(id)) {
            return Err(StoreError::Duplicate(format!(
                "key id already enrolled for user {}",
                legacy.user_id
            )));
        }
        inner.rows.insert(
            id,
            Row::Current(CredentialRecord {
                id,
                user_id: legacy.user_id,
                name: legacy.name,
                key_id: columns.key_id,
                public_key: columns.public_key,
                attestation_type: columns.attestation_type,
                aaguid: columns.aaguid,
                sign_counter: legacy.counter,
                created_at: legacy.created_at,
                updated_at: Utc::now(),
            }),
        );
        Ok(())
    }
}
