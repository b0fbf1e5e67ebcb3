//! Failure taxonomy shared by the credential and OAuth layers.
//!
//! Store and codec errors keep their own detail; the ceremony and flow layers
//! classify them into an [`ErrorKind`] which the web layer maps to transport
//! responses.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    SessionMissing,
    Unauthorized,
    InvalidRequest,
    ReplayDetected,
    ServerError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::SessionMissing => "session_missing",
            Self::Unauthorized => "unauthorized",
            Self::InvalidRequest => "invalid_request",
            Self::ReplayDetected => "replay_detected",
            Self::ServerError => "server_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence failures raised by credential and OAuth stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {id} does not exist")]
    NotExist { id: i64 },
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("sign counter for record {id} would not increase")]
    CounterRegression { id: i64 },
    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist { .. } => ErrorKind::NotFound,
            Self::Duplicate(_) => ErrorKind::Conflict,
            Self::CounterRegression { .. } => ErrorKind::ReplayDetected,
            Self::Corrupt(_) | Self::Database(_) => ErrorKind::ServerError,
        }
    }

    #[must_use]
    pub const fn is_not_exist(&self) -> bool {
        matches!(self, Self::NotExist { .. })
    }
}

/// Postgres reports unique violations as SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
