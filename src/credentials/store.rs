use crate::credentials::models::{
    CredentialRecord, CredentialUpdate, LegacyCredentialRecord, MigratedColumns,
    NewCredentialRecord,
};
use crate::error::StoreError;
use async_trait::async_trait;

/// Per-user authenticator credentials.
///
/// `list_by_user` returns records ordered by ascending id and never fails on
/// an empty result. Operations addressing a single id fail with
/// [`StoreError::NotExist`] when it is absent, except `delete`, which reports
/// whether a row was removed.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<CredentialRecord, StoreError>;

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<CredentialRecord>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the user already holds `key_id`.
    async fn insert(&self, record: NewCredentialRecord) -> Result<i64, StoreError>;

    /// Writes only the populated columns. A `sign_counter` is applied only if
    /// it is strictly greater than the stored one; otherwise the whole update
    /// is rejected with [`StoreError::CounterRegression`].
    async fn update_fields(&self, id: i64, update: CredentialUpdate) -> Result<(), StoreError>;

    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// Cursor access to rows still in the legacy layout.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Creates or extends the credential relation. Additive only.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Up to `limit` legacy rows with `id > after_id`, ascending by id.
    async fn legacy_page(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<LegacyCredentialRecord>, StoreError>;

    /// Rewrites a legacy row into the current layout and marks it migrated.
    async fn write_migrated(&self, id: i64, columns: MigratedColumns) -> Result<(), StoreError>;
}
