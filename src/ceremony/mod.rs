//! Registration and assertion ceremonies over stored credentials.

pub mod principal;
pub mod service;
pub mod verifier;

pub use self::principal::{StoredUser, UserIdentity, WebAuthnUser};
pub use self::service::{AssertionOutcome, CeremonyCoordinator, CeremonyError};
pub use self::verifier::{CeremonyVerifier, Challenge, UserEntity, VerifierError};
