//! Registration and assertion ceremonies for hardware security keys.
//!
//! Each ceremony is two calls. `begin_*` asks the verifier for a challenge and
//! parks the verifier state in the caller's session; `finish_*` takes that
//! state back out (so it can be used once), verifies the authenticator
//! response and persists the outcome. A missing or already-consumed state is
//! [`CeremonyError::SessionMissing`].
//!
//! Failures reported to callers carry no verification detail; the reason is
//! logged at debug level instead.

use crate::ceremony::principal::{StoredUser, UserIdentity, WebAuthnUser};
use crate::ceremony::verifier::{CeremonyVerifier, UserEntity, VerifierError};
use crate::credentials::{adapter, Credential, CredentialRecord, CredentialStore};
use crate::error::{ErrorKind, StoreError};
use crate::session::{SessionError, SessionKey, SessionSlot, SessionStore, SessionValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("{0}")]
    Conflict(&'static str),
    #[error("no pending ceremony for this session")]
    SessionMissing,
    #[error("no security keys registered")]
    NoCredentials,
    #[error("not allowed")]
    Unauthorized,
    #[error("authenticator counter did not increase")]
    ReplayDetected,
    #[error("verification failed, please try again")]
    VerificationFailed,
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CeremonyError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::SessionMissing => ErrorKind::SessionMissing,
            Self::NoCredentials => ErrorKind::NotFound,
            Self::Unauthorized | Self::VerificationFailed => ErrorKind::Unauthorized,
            Self::ReplayDetected => ErrorKind::ReplayDetected,
            Self::Store(err) => err.kind(),
            Self::Session(_) => ErrorKind::ServerError,
        }
    }
}

impl From<StoreError> for CeremonyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CounterRegression { .. } => Self::ReplayDetected,
            StoreError::Duplicate(_) => Self::Conflict("security key is already registered"),
            other => Self::Store(other),
        }
    }
}

fn rejected(err: &VerifierError) -> CeremonyError {
    debug!(error = %err, "ceremony verification rejected");
    CeremonyError::VerificationFailed
}

/// Result of a successful assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionOutcome {
    pub record_id: i64,
    pub sign_counter: u32,
}

pub struct CeremonyCoordinator {
    store: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn CeremonyVerifier>,
}

impl CeremonyCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn CeremonyVerifier>,
    ) -> Self {
        Self {
            store,
            sessions,
            verifier,
        }
    }

    fn principal(&self, user: &UserIdentity) -> StoredUser {
        StoredUser::new(user.clone(), self.store.clone())
    }

    fn entity(user: &dyn WebAuthnUser) -> UserEntity {
        UserEntity {
            id: user.identity_bytes(),
            name: user.secondary_name(),
            display_name: user.display_name(),
            icon: user.icon_ref(),
        }
    }

    /// Issues a registration challenge for a key to be called `name`.
    ///
    /// # Errors
    /// [`CeremonyError::Conflict`] if `name` is empty or already used by one
    /// of the user's keys.
    #[instrument(skip(self, session, user), fields(user_id = user.id))]
    pub async fn begin_registration(
        &self,
        session: &SessionKey,
        user: &UserIdentity,
        name: &str,
    ) -> Result<serde_json::Value, CeremonyError> {
        if name.is_empty() {
            return Err(CeremonyError::Conflict("security key name is required"));
        }
        let records = self.store.list_by_user(user.id).await?;
        if records.iter().any(|record| record.name == name) {
            return Err(CeremonyError::Conflict("name already taken"));
        }

        let principal = self.principal(user);
        let existing = adapter::to_credentials(&records);
        let challenge = self
            .verifier
            .begin_registration(&Self::entity(&principal), &existing)
            .map_err(|e| rejected(&e))?;

        self.sessions
            .set(
                session,
                SessionValue::PendingRegistration {
                    name: name.to_string(),
                    state: challenge.state,
                },
            )
            .await?;
        debug!(excluded = existing.len(), "registration challenge issued");
        Ok(challenge.options)
    }

    /// Verifies the attestation and stores the new key. Returns its record id.
    ///
    /// # Errors
    /// [`CeremonyError::SessionMissing`] without a pending registration and
    /// [`CeremonyError::VerificationFailed`] if the response does not verify.
    #[instrument(skip(self, session, user, response), fields(user_id = user.id))]
    pub async fn finish_registration(
        &self,
        session: &SessionKey,
        user: &UserIdentity,
        response: &serde_json::Value,
    ) -> Result<i64, CeremonyError> {
        let Some(SessionValue::PendingRegistration { name, state }) =
            self.sessions.take(session, SessionSlot::Registration).await?
        else {
            return Err(CeremonyError::SessionMissing);
        };

        let credential = self
            .verifier
            .finish_registration(&state, response)
            .map_err(|e| rejected(&e))?;
        let id = self
            .principal(user)
            .add_credential(&name, &credential)
            .await?;

        info!(credential_id = id, "security key registered");
        Ok(id)
    }

    /// Issues an assertion challenge bound to the user's enrolled keys.
    ///
    /// # Errors
    /// [`CeremonyError::NoCredentials`] if the user has no keys.
    #[instrument(skip(self, session, user), fields(user_id = user.id))]
    pub async fn begin_assertion(
        &self,
        session: &SessionKey,
        user: &UserIdentity,
    ) -> Result<serde_json::Value, CeremonyError> {
        let principal = self.principal(user);
        let credentials = principal.credentials().await?;
        if credentials.is_empty() {
            return Err(CeremonyError::NoCredentials);
        }

        let challenge = self
            .verifier
            .begin_assertion(&Self::entity(&principal), &credentials)
            .map_err(|e| rejected(&e))?;
        self.sessions
            .set(
                session,
                SessionValue::PendingAssertion {
                    state: challenge.state,
                },
            )
            .await?;
        Ok(challenge.options)
    }

    /// Verifies the assertion and advances the stored counter before
    /// reporting success.
    ///
    /// # Errors
    /// [`CeremonyError::ReplayDetected`] if the returned counter is not greater
    /// than the stored one; nothing is written in that case.
    #[instrument(skip(self, session, user, response), fields(user_id = user.id))]
    pub async fn finish_assertion(
        &self,
        session: &SessionKey,
        user: &UserIdentity,
        response: &serde_json::Value,
    ) -> Result<AssertionOutcome, CeremonyError> {
        let Some(SessionValue::PendingAssertion { state }) =
            self.sessions.take(session, SessionSlot::Assertion).await?
        else {
            return Err(CeremonyError::SessionMissing);
        };

        let key_id = self
            .verifier
            .credential_id(response)
            .map_err(|e| rejected(&e))?;
        let records = self.store.list_by_user(user.id).await?;
        let record = records
            .iter()
            .find(|record| record.key_id == key_id)
            .ok_or_else(|| {
                debug!("assertion names a key that is not enrolled");
                CeremonyError::VerificationFailed
            })?;

        let stored = adapter::to_credential(record);
        let asserted: Credential = self
            .verifier
            .finish_assertion(&state, &stored, response)
            .map_err(|e| rejected(&e))?;
        self.advance_counter(record, &asserted).await
    }

    async fn advance_counter(
        &self,
        record: &CredentialRecord,
        asserted: &Credential,
    ) -> Result<AssertionOutcome, CeremonyError> {
        let counter = asserted.authenticator.sign_counter;
        if counter <= record.sign_counter {
            warn!(
                credential_id = record.id,
                stored = record.sign_counter,
                returned = counter,
                "authenticator counter did not increase, possible cloned key"
            );
            return Err(CeremonyError::ReplayDetected);
        }

        let update = adapter::apply_credential_update(record, asserted);
        self.store.update_fields(record.id, update).await?;
        Ok(AssertionOutcome {
            record_id: record.id,
            sign_counter: counter,
        })
    }

    /// Deletes one of the user's keys. Unknown ids succeed silently.
    ///
    /// # Errors
    /// [`CeremonyError::Unauthorized`] if the key belongs to another user.
    #[instrument(skip(self))]
    pub async fn delete_credential(&self, user_id: i64, id: i64) -> Result<(), CeremonyError> {
        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(err) if err.is_not_exist() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if record.user_id != user_id {
            return Err(CeremonyError::Unauthorized);
        }
        if self.store.delete(id).await? {
            info!(credential_id = id, "security key deleted");
        }
        Ok(())
    }

    /// The user's keys, ascending by id.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn list_credentials(
        &self,
        user_id: i64,
    ) -> Result<Vec<CredentialRecord>, CeremonyError> {
        Ok(self.store.list_by_user(user_id).await?)
    }
}
