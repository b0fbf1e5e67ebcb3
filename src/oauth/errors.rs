//! RFC 6749 error responses for the authorize and token endpoints.
//!
//! The `ToSchema` derives let the embedding web layer list these bodies in
//! its OpenAPI document.

use crate::error::{ErrorKind, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

/// Authorization endpoint error codes (RFC 6749 section 4.1.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizeErrorCode {
    InvalidRequest,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
}

impl AuthorizeErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::InvalidRequest | Self::UnsupportedResponseType | Self::InvalidScope => {
                ErrorKind::InvalidRequest
            }
            Self::UnauthorizedClient | Self::AccessDenied => ErrorKind::Unauthorized,
            Self::ServerError | Self::TemporarilyUnavailable => ErrorKind::ServerError,
        }
    }
}

impl fmt::Display for AuthorizeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of authorize or consent.
///
/// With a trusted `redirect_uri` the caller redirects to [`Self::redirect`];
/// without one it renders a generic error page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {description}")]
pub struct AuthorizeError {
    pub code: AuthorizeErrorCode,
    pub description: String,
    pub state: String,
    pub redirect_uri: Option<Url>,
}

impl AuthorizeError {
    pub(crate) fn new(code: AuthorizeErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            state: String::new(),
            redirect_uri: None,
        }
    }

    /// Error delivered back to a redirect URI that is already trusted.
    pub(crate) fn redirecting(
        code: AuthorizeErrorCode,
        description: impl Into<String>,
        redirect_uri: Url,
        state: &str,
    ) -> Self {
        Self {
            code,
            description: description.into(),
            state: state.to_string(),
            redirect_uri: Some(redirect_uri),
        }
    }

    pub(crate) fn server_error(err: &dyn std::error::Error) -> Self {
        tracing::error!(error = %err, "oauth authorize failed");
        Self::new(AuthorizeErrorCode::ServerError, "internal server error")
    }

    /// Server failure once `redirect_uri` is trusted: the client is told
    /// through the redirect.
    pub(crate) fn redirecting_server_error(
        err: &dyn std::error::Error,
        redirect_uri: &Url,
        state: &str,
    ) -> Self {
        tracing::error!(error = %err, "oauth authorize failed");
        Self::redirecting(
            AuthorizeErrorCode::ServerError,
            "A server error occurred",
            redirect_uri.clone(),
            state,
        )
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Redirect target carrying `error`, `error_description` and `state`.
    #[must_use]
    pub fn redirect(&self) -> Option<Url> {
        let mut url = self.redirect_uri.clone()?;
        url.query_pairs_mut()
            .append_pair("error", self.code.as_str())
            .append_pair("error_description", &self.description)
            .append_pair("state", &self.state);
        Some(url)
    }
}

impl From<StoreError> for AuthorizeError {
    fn from(err: StoreError) -> Self {
        Self::server_error(&err)
    }
}

/// Token endpoint error codes (RFC 6749 section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    ServerError,
}

impl AccessTokenErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
        }
    }

    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::InvalidRequest | Self::UnsupportedGrantType | Self::InvalidScope => {
                ErrorKind::InvalidRequest
            }
            Self::InvalidClient => ErrorKind::NotFound,
            Self::InvalidGrant | Self::UnauthorizedClient => ErrorKind::Unauthorized,
            Self::ServerError => ErrorKind::ServerError,
        }
    }
}

impl fmt::Display for AccessTokenErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token endpoint failure; serializes to the RFC 6749 error body.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[error("{error}: {error_description}")]
pub struct AccessTokenError {
    pub error: AccessTokenErrorCode,
    pub error_description: String,
}

impl AccessTokenError {
    pub(crate) fn new(error: AccessTokenErrorCode, description: impl Into<String>) -> Self {
        Self {
            error,
            error_description: description.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl From<StoreError> for AccessTokenError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "oauth token request failed");
        Self::new(AccessTokenErrorCode::ServerError, "internal server error")
    }
}
