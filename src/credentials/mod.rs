//! Per-user authenticator credentials: persistence, the legacy U2F migration,
//! and the mapping to ceremony credentials.

pub mod adapter;
pub mod encoding;
pub mod memory;
pub mod migration;
pub mod models;
pub mod repo;
pub mod store;

pub use self::memory::MemoryCredentialStore;
pub use self::migration::{MigrationConfig, MigrationEngine, MigrationError, MigrationReport};
pub use self::models::{Aaguid, Authenticator, Credential, CredentialRecord, CredentialUpdate};
pub use self::repo::PgCredentialStore;
pub use self::store::{CredentialStore, MigrationStore};
