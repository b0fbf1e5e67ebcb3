//! Seam to the cryptographic challenge/response implementation.
//!
//! The coordinator never inspects challenges or authenticator responses; it
//! stores the opaque state a verifier hands back and returns it on finish.

use crate::credentials::Credential;
use serde::Serialize;
use thiserror::Error;

/// Relying-party view of the user, derived from [`super::WebAuthnUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEntity {
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
    pub icon: String,
}

/// Options to send to the client plus state to keep server-side.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub options: serde_json::Value,
    pub state: Vec<u8>,
}

/// Failure inside a verifier. The detail is for logs only.
#[derive(Debug, Error)]
#[error("ceremony verification failed: {0}")]
pub struct VerifierError(pub String);

pub trait CeremonyVerifier: Send + Sync {
    /// # Errors
    /// Returns an error if a challenge cannot be generated.
    fn begin_registration(
        &self,
        user: &UserEntity,
        exclude: &[Credential],
    ) -> Result<Challenge, VerifierError>;

    /// Verifies an attestation response and yields the new credential.
    ///
    /// # Errors
    /// Returns an error if the response does not satisfy `state`.
    fn finish_registration(
        &self,
        state: &[u8],
        response: &serde_json::Value,
    ) -> Result<Credential, VerifierError>;

    /// # Errors
    /// Returns an error if a challenge cannot be generated.
    fn begin_assertion(
        &self,
        user: &UserEntity,
        allowed: &[Credential],
    ) -> Result<Challenge, VerifierError>;

    /// Key identifier the response claims to be signed by.
    ///
    /// # Errors
    /// Returns an error if the response carries no usable identifier.
    fn credential_id(&self, response: &serde_json::Value) -> Result<Vec<u8>, VerifierError>;

    /// Checks the signature against `credential` and returns it with the
    /// authenticator state reported by the response.
    ///
    /// # Errors
    /// Returns an error if the signature or challenge does not verify.
    fn finish_assertion(
        &self,
        state: &[u8],
        credential: &Credential,
        response: &serde_json::Value,
    ) -> Result<Credential, VerifierError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic verifier: a response is valid when it echoes the
    //! challenge and sets `"valid": true`.

    use super::*;
    use crate::credentials::{Aaguid, Authenticator};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU8, Ordering};

    #[derive(Default)]
    pub(crate) struct EchoVerifier {
        next: AtomicU8,
    }

    fn bytes(value: &Value, field: &str) -> Result<Vec<u8>, VerifierError> {
        serde_json::from_value(value.get(field).cloned().unwrap_or(Value::Null))
            .map_err(|e| VerifierError(format!("{field}: {e}")))
    }

    fn check(state: &[u8], response: &Value) -> Result<(), VerifierError> {
        if bytes(response, "challenge")? != state {
            return Err(VerifierError("challenge mismatch".to_string()));
        }
        if response.get("valid") != Some(&Value::Bool(true)) {
            return Err(VerifierError("bad signature".to_string()));
        }
        Ok(())
    }

    fn counter(response: &Value) -> u32 {
        response
            .get("counter")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0)
    }

    impl EchoVerifier {
        fn challenge(&self, user: &UserEntity, ids: &[Credential], key: &str) -> Challenge {
            let state = vec![self.next.fetch_add(1, Ordering::SeqCst), 0xc4];
            let ids: Vec<&Vec<u8>> = ids.iter().map(|c| &c.id).collect();
            let mut options = json!({ "challenge": &state, "user": user });
            options[key] = json!(ids);
            Challenge { options, state }
        }
    }

    impl CeremonyVerifier for EchoVerifier {
        fn begin_registration(
            &self,
            user: &UserEntity,
            exclude: &[Credential],
        ) -> Result<Challenge, VerifierError> {
            Ok(self.challenge(user, exclude, "exclude"))
        }

        fn finish_registration(
            &self,
            state: &[u8],
            response: &Value,
        ) -> Result<Credential, VerifierError> {
            check(state, response)?;
            Ok(Credential {
                id: bytes(response, "id")?,
                public_key: bytes(response, "public_key")?,
                attestation_type: "none".to_string(),
                authenticator: Authenticator {
                    aaguid: Aaguid::ZERO,
                    sign_counter: counter(response),
                },
            })
        }

        fn begin_assertion(
            &self,
            user: &UserEntity,
            allowed: &[Credential],
        ) -> Result<Challenge, VerifierError> {
            Ok(self.challenge(user, allowed, "allow"))
        }

        fn credential_id(&self, response: &Value) -> Result<Vec<u8>, VerifierError> {
            bytes(response, "id")
        }

        fn finish_assertion(
            &self,
            state: &[u8],
            credential: &Credential,
            response: &Value,
        ) -> Result<Credential, VerifierError> {
            check(state, response)?;
            let mut updated = credential.clone();
            updated.authenticator.sign_counter = counter(response);
            Ok(updated)
        }
    }

    /// Response that satisfies the challenge in `options`.
    pub(crate) fn response(options: &Value, id: &[u8], counter: u32) -> Value {
        json!({
            "challenge": options["challenge"],
            "id": id,
            "public_key": [4, 1, 2, 3],
            "counter": counter,
            "valid": true,
        })
    }
}
