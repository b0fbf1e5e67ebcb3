//! # Latchkey
//!
//! Security credential core: per-user authenticator credentials and the
//! OAuth2 authorization-code grant.
//!
//! ## Credentials
//!
//! Security keys live in one `security_keys` relation. Rows enrolled before
//! the WebAuthn switch carry only the raw U2F registration blob; the
//! migration sweep (`latchkey migrate`) decodes them into the current layout
//! page by page and flips their format marker, so a rerun only touches rows
//! that were not converted yet.
//!
//! Registration and assertion ceremonies keep their challenge state in an
//! external [`session::SessionStore`]. Sign counters only move forward; a
//! replayed or concurrent assertion that does not advance the counter is
//! rejected before success is reported.
//!
//! ## OAuth2
//!
//! Only the authorization-code grant is implemented. Redirect URIs match
//! byte for byte. Client secrets are stored as Argon2 hashes, codes and
//! access tokens as SHA-256 digests. A bad client secret and a missing grant
//! produce the same `unauthorized_client` error.
//!
//! HTTP routing, templates and CSRF wiring belong to the web layer that
//! calls into this crate.

pub mod ceremony;
pub mod cli;
pub mod credentials;
pub mod db;
pub mod error;
pub mod oauth;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

/// Reported to Postgres as `application_name`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
