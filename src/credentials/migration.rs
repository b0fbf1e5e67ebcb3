//! One-shot sweep that rewrites legacy U2F rows into the current layout.
//!
//! Rows are read in ascending-id pages behind a keyset cursor, so the full
//! table is never held in memory. Only rows still marked legacy are selected,
//! which makes a re-run after success a no-op and lets an interrupted run
//! resume where it stopped.
//!
//! A single undecodable blob aborts the sweep: authenticator data cannot be
//! guessed, and skipping a row would silently drop a user's credential.

use crate::credentials::encoding::{
    EncodingError, LegacyDecodeError, LegacyRegistration, PublicKeyEncoding,
};
use crate::credentials::models::{
    Aaguid, LegacyCredentialRecord, MigratedColumns, ATTESTATION_NONE,
};
use crate::credentials::store::MigrationStore;
use crate::error::{ErrorKind, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationConfig {
    page_size: i64,
    encoding: PublicKeyEncoding,
}

impl MigrationConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            encoding: PublicKeyEncoding::Cose,
        }
    }

    /// Non-positive sizes fall back to [`DEFAULT_PAGE_SIZE`].
    #[must_use]
    pub const fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = if page_size > 0 {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };
        self
    }

    #[must_use]
    pub const fn with_encoding(mut self, encoding: PublicKeyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub const fn page_size(&self) -> i64 {
        self.page_size
    }

    #[must_use]
    pub const fn encoding(&self) -> PublicKeyEncoding {
        self.encoding
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("legacy credential {id} could not be decoded: {source}")]
    Decode {
        id: i64,
        #[source]
        source: LegacyDecodeError,
    },
    #[error("public key of credential {id} could not be encoded: {source}")]
    Encode {
        id: i64,
        #[source]
        source: EncodingError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MigrationError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode { .. } | Self::Encode { .. } => ErrorKind::ServerError,
            Self::Store(err) => err.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub pages: u64,
    pub migrated: u64,
}

pub struct MigrationEngine {
    store: Arc<dyn MigrationStore>,
    config: MigrationConfig,
}

impl MigrationEngine {
    #[must_use]
    pub fn new(store: Arc<dyn MigrationStore>, config: MigrationConfig) -> Self {
        Self { store, config }
    }

    /// Derives the current-layout columns for one legacy row.
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or the key cannot be encoded.
    pub fn convert(
        &self,
        legacy: &LegacyCredentialRecord,
    ) -> Result<MigratedColumns, MigrationError> {
        let registration =
            LegacyRegistration::decode(&legacy.raw).map_err(|source| MigrationError::Decode {
                id: legacy.id,
                source,
            })?;
        let public_key = self
            .config
            .encoding
            .encode(&registration.point)
            .map_err(|source| MigrationError::Encode {
                id: legacy.id,
                source,
            })?;
        // TODO: read the FIDO AAGUID extension (1.3.6.1.4.1.45724.1.1.4) from
        // the attestation certificate once certificate parsing is adopted.
        Ok(MigratedColumns {
            key_id: registration.key_handle,
            public_key,
            attestation_type: ATTESTATION_NONE.to_string(),
            aaguid: Aaguid::ZERO,
        })
    }

    /// Runs the sweep to completion.
    ///
    /// Must not run concurrently with live credential writes.
    ///
    /// # Errors
    /// Returns the first decode, encode, or store failure; rows migrated before
    /// it stay migrated.
    #[instrument(
        skip(self),
        fields(
            page_size = self.config.page_size,
            encoding = self.config.encoding.as_str()
        )
    )]
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        self.store.ensure_schema().await?;

        let mut report = MigrationReport::default();
        let mut cursor = i64::MIN;
        loop {
            let page = self
                .store
                .legacy_page(cursor, self.config.page_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.id;
            report.pages += 1;

            for legacy in &page {
                let columns = self.convert(legacy)?;
                self.store.write_migrated(legacy.id, columns).await?;
                report.migrated += 1;
            }
            debug!(rows = page.len(), cursor, "migrated credential page");
        }

        info!(
            pages = report.pages,
            migrated = report.migrated,
            "credential migration finished"
        );
        Ok(report)
    }
}
