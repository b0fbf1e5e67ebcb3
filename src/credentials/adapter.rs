//! Mapping between stored records and ceremony credentials. No I/O.

use crate::credentials::models::{
    Authenticator, Credential, CredentialRecord, CredentialUpdate, NewCredentialRecord,
};

#[must_use]
pub fn to_credential(record: &CredentialRecord) -> Credential {
    Credential {
        id: record.key_id.clone(),
        public_key: record.public_key.clone(),
        attestation_type: record.attestation_type.clone(),
        authenticator: Authenticator {
            aaguid: record.aaguid,
            sign_counter: record.sign_counter,
        },
    }
}

/// Maps records in input order.
#[must_use]
pub fn to_credentials(records: &[CredentialRecord]) -> Vec<Credential> {
    records.iter().map(to_credential).collect()
}

/// Columns that differ between `record` and the post-assertion `credential`.
#[must_use]
pub fn apply_credential_update(
    record: &CredentialRecord,
    credential: &Credential,
) -> CredentialUpdate {
    let auth = &credential.authenticator;
    CredentialUpdate {
        public_key: (record.public_key != credential.public_key)
            .then(|| credential.public_key.clone()),
        attestation_type: (record.attestation_type != credential.attestation_type)
            .then(|| credential.attestation_type.clone()),
        aaguid: (record.aaguid != auth.aaguid).then_some(auth.aaguid),
        sign_counter: (record.sign_counter != auth.sign_counter).then_some(auth.sign_counter),
    }
}

/// Record for a freshly enrolled credential.
#[must_use]
pub fn to_new_record(user_id: i64, name: &str, credential: &Credential) -> NewCredentialRecord {
    NewCredentialRecord {
        user_id,
        name: name.to_string(),
        key_id: credential.id.clone(),
        public_key: credential.public_key.clone(),
        attestation_type: credential.attestation_type.clone(),
        aaguid: credential.authenticator.aaguid,
        sign_counter: credential.authenticator.sign_counter,
    }
}
