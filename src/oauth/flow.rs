//! Authorization-code grant: authorize, consent, token.
//!
//! ```text
//! Requested -> ConsentPending -> Granted -> CodeIssued -> TokenIssued
//!     \-> Rejected (any validation step)
//! ```
//!
//! A principal that already holds a grant for the application skips the
//! consent step. Raw secrets, codes and tokens are never stored or logged;
//! the stores only see their hashes.

use crate::error::StoreError;
use crate::oauth::errors::{
    AccessTokenError, AccessTokenErrorCode, AuthorizeError, AuthorizeErrorCode,
};
use crate::oauth::models::{
    AccessToken, AccessTokenResponse, AuthorizationCode, NewApplication, OAuth2Application,
    OAuth2Grant, RESPONSE_TYPE_CODE, TOKEN_TYPE_BEARER,
};
use crate::oauth::store::OAuthStore;
use crate::oauth::utils::{generate_token, hash_client_secret, hash_token, verify_client_secret};
use crate::session::{ConsentBinding, SessionKey, SessionSlot, SessionStore, SessionValue};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u32 = 3600;
pub const DEFAULT_CODE_TTL_SECONDS: u32 = 600;

/// Lifetimes for issued codes and tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OAuthConfig {
    access_token_ttl_seconds: u32,
    code_ttl_seconds: u32,
}

impl OAuthConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
        }
    }

    /// Zero keeps the default.
    #[must_use]
    pub const fn with_access_token_ttl(mut self, seconds: u32) -> Self {
        if seconds > 0 {
            self.access_token_ttl_seconds = seconds;
        }
        self
    }

    /// Zero keeps the default.
    #[must_use]
    pub const fn with_code_ttl(mut self, seconds: u32) -> Self {
        if seconds > 0 {
            self.code_ttl_seconds = seconds;
        }
        self
    }

    #[must_use]
    pub const fn access_token_ttl_seconds(&self) -> u32 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub const fn code_ttl_seconds(&self) -> u32 {
        self.code_ttl_seconds
    }

    fn access_token_ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.access_token_ttl_seconds))
    }

    fn code_ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.code_ttl_seconds))
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A freshly registered client. `client_secret` is only available here.
#[derive(Debug)]
pub struct RegisteredApplication {
    pub application: OAuth2Application,
    pub client_secret: SecretString,
}

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub state: String,
}

/// What the consent page needs to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentPrompt {
    pub application_name: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Redirect to the client with `code` and `state`.
    Redirect(Url),
    ConsentRequired(ConsentPrompt),
}

/// Submitted consent form. The triple must equal what authorize stored.
#[derive(Debug, Clone)]
pub struct ConsentForm {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
    pub approved: bool,
}

#[derive(Debug, Clone)]
pub struct CodeExchange {
    pub code: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub client_id: String,
    pub client_secret: SecretString,
    pub user_id: i64,
    pub code: Option<CodeExchange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAccessToken {
    pub response: AccessTokenResponse,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

pub struct AuthorizationFlow {
    store: Arc<dyn OAuthStore>,
    sessions: Arc<dyn SessionStore>,
    config: OAuthConfig,
}

impl AuthorizationFlow {
    #[must_use]
    pub fn new(
        store: Arc<dyn OAuthStore>,
        sessions: Arc<dyn SessionStore>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Register a client owned by `owner_id`.
    ///
    /// # Errors
    /// Fails if a redirect URI is not an absolute URL, if none are given, or
    /// if the store rejects the insert.
    #[instrument(skip(self, redirect_uris))]
    pub async fn register_application(
        &self,
        owner_id: i64,
        name: &str,
        redirect_uris: Vec<String>,
    ) -> anyhow::Result<RegisteredApplication> {
        if name.trim().is_empty() {
            return Err(anyhow!("application name must not be empty"));
        }
        if redirect_uris.is_empty() {
            return Err(anyhow!("at least one redirect URI is required"));
        }
        for uri in &redirect_uris {
            Url::parse(uri).with_context(|| format!("invalid redirect URI: {uri}"))?;
        }

        let secret = generate_token()?;
        let client_secret_hash = hash_client_secret(&secret)?;
        let application = self
            .store
            .create_application(NewApplication {
                owner_id,
                name: name.to_string(),
                client_id: Uuid::new_v4(),
                client_secret_hash,
                redirect_uris,
            })
            .await
            .context("failed to store application")?;

        info!(client_id = %application.client_id, "oauth application registered");
        Ok(RegisteredApplication {
            application,
            client_secret: SecretString::from(secret),
        })
    }

    /// Validate an authorization request for `user_id`.
    ///
    /// # Errors
    /// Unknown clients and untrusted redirect URIs fail without a redirect
    /// target. Later failures redirect back to the client.
    #[instrument(skip(self, session, request), fields(client_id = %request.client_id))]
    pub async fn authorize(
        &self,
        session: &SessionKey,
        user_id: i64,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeOutcome, AuthorizeError> {
        let application = self.resolve_client(&request.client_id).await?;

        if !application.contains_redirect_uri(&request.redirect_uri) {
            warn!("redirect uri not registered");
            return Err(AuthorizeError::new(
                AuthorizeErrorCode::InvalidRequest,
                "redirect_uri is not registered for this client",
            ));
        }
        let redirect = parse_trusted_redirect(&request.redirect_uri)?;

        if request.response_type != RESPONSE_TYPE_CODE {
            return Err(AuthorizeError::redirecting(
                AuthorizeErrorCode::UnsupportedResponseType,
                "Only code response type is supported.",
                redirect,
                &request.state,
            ));
        }

        let grant = self
            .store
            .grant_for_user(application.id, user_id)
            .await
            .map_err(|err| {
                AuthorizeError::redirecting_server_error(&err, &redirect, &request.state)
            })?;
        if let Some(grant) = grant {
            let url = self
                .issue_code(&grant, redirect, &request.redirect_uri, &request.state)
                .await?;
            return Ok(AuthorizeOutcome::Redirect(url));
        }

        let binding = ConsentBinding {
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            state: request.state.clone(),
        };
        self.sessions
            .set(session, SessionValue::Consent(binding))
            .await
            .map_err(|err| {
                AuthorizeError::redirecting_server_error(&err, &redirect, &request.state)
            })?;

        Ok(AuthorizeOutcome::ConsentRequired(ConsentPrompt {
            application_name: application.name,
            client_id: request.client_id,
            redirect_uri: request.redirect_uri,
            state: request.state,
        }))
    }

    /// Apply a consent decision for the binding stored by [`Self::authorize`].
    ///
    /// # Errors
    /// A missing or mismatched binding fails with a generic
    /// `invalid_request` and no redirect. A denial redirects with
    /// `access_denied`, a store failure with `server_error`.
    #[instrument(skip(self, session, form), fields(client_id = %form.client_id))]
    pub async fn grant_consent(
        &self,
        session: &SessionKey,
        user_id: i64,
        form: ConsentForm,
    ) -> Result<Url, AuthorizeError> {
        let stored = self
            .sessions
            .take(session, SessionSlot::OAuthConsent)
            .await
            .map_err(|err| AuthorizeError::server_error(&err))?;
        let submitted = ConsentBinding {
            client_id: form.client_id,
            redirect_uri: form.redirect_uri,
            state: form.state,
        };
        match stored {
            Some(SessionValue::Consent(binding)) if binding == submitted => {}
            _ => {
                warn!("consent form does not match session");
                return Err(AuthorizeError::new(
                    AuthorizeErrorCode::InvalidRequest,
                    "invalid consent request",
                ));
            }
        }

        let application = self.resolve_client(&submitted.client_id).await?;
        if !application.contains_redirect_uri(&submitted.redirect_uri) {
            return Err(AuthorizeError::new(
                AuthorizeErrorCode::InvalidRequest,
                "invalid consent request",
            ));
        }
        let redirect = parse_trusted_redirect(&submitted.redirect_uri)?;

        if !form.approved {
            info!("consent denied");
            return Err(AuthorizeError::redirecting(
                AuthorizeErrorCode::AccessDenied,
                "The resource owner denied the request.",
                redirect,
                &submitted.state,
            ));
        }

        let grant = self
            .store
            .create_grant(application.id, user_id)
            .await
            .map_err(|err| {
                AuthorizeError::redirecting_server_error(&err, &redirect, &submitted.state)
            })?;
        info!(grant_id = grant.id, "oauth grant recorded");
        self.issue_code(&grant, redirect, &submitted.redirect_uri, &submitted.state)
            .await
    }

    /// Exchange client credentials (and optionally a code) for an access
    /// token.
    ///
    /// # Errors
    /// `invalid_client` for unknown clients, `unauthorized_client` for a bad
    /// secret or a missing grant, `invalid_grant` for a code that cannot be
    /// redeemed.
    #[instrument(
        skip(self, request),
        fields(user_id = request.user_id, client_id = %request.client_id)
    )]
    pub async fn token(&self, request: TokenRequest) -> Result<IssuedAccessToken, AccessTokenError> {
        let unknown_client =
            || AccessTokenError::new(AccessTokenErrorCode::InvalidClient, "client is unknown");
        let client_id = Uuid::parse_str(&request.client_id).map_err(|_| unknown_client())?;
        let application = self
            .store
            .application_by_client_id(&client_id)
            .await?
            .ok_or_else(unknown_client)?;

        // Secret mismatch and missing grant are indistinguishable to the caller.
        let unauthorized = || {
            AccessTokenError::new(
                AccessTokenErrorCode::UnauthorizedClient,
                "client is not authorized",
            )
        };
        if !verify_client_secret(
            request.client_secret.expose_secret(),
            &application.client_secret_hash,
        ) {
            warn!("client secret mismatch");
            return Err(unauthorized());
        }
        let grant = self
            .store
            .grant_for_user(application.id, request.user_id)
            .await?
            .ok_or_else(unauthorized)?;

        let issued_at = Utc::now();
        if let Some(exchange) = &request.code {
            let consumed = self
                .store
                .consume_authorization_code(
                    &hash_token(&exchange.code),
                    grant.id,
                    &exchange.redirect_uri,
                    issued_at,
                )
                .await?;
            if !consumed {
                warn!("authorization code rejected");
                return Err(AccessTokenError::new(
                    AccessTokenErrorCode::InvalidGrant,
                    "authorization code is invalid, expired or already used",
                ));
            }
        }

        let token = generate_token().map_err(|err| {
            tracing::error!(error = %err, "failed to generate access token");
            AccessTokenError::new(AccessTokenErrorCode::ServerError, "internal server error")
        })?;
        let valid_until = issued_at + self.config.access_token_ttl();
        self.store
            .insert_access_token(AccessToken {
                token_hash: hash_token(&token),
                user_id: request.user_id,
                grant_id: grant.id,
                valid_until,
            })
            .await?;

        info!(grant_id = grant.id, "access token issued");
        Ok(IssuedAccessToken {
            response: AccessTokenResponse {
                access_token: token,
                token_type: TOKEN_TYPE_BEARER.to_string(),
                expires_in: i64::from(self.config.access_token_ttl_seconds),
            },
            issued_at,
            valid_until,
        })
    }

    /// Resolve a bearer token. Unknown and expired tokens yield `None`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the lookup fails.
    pub async fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<Option<AccessToken>, StoreError> {
        let record = self.store.access_token_by_hash(&hash_token(token)).await?;
        Ok(record.filter(|record| record.valid_until > Utc::now()))
    }

    async fn resolve_client(&self, client_id: &str) -> Result<OAuth2Application, AuthorizeError> {
        let unknown =
            || AuthorizeError::new(AuthorizeErrorCode::UnauthorizedClient, "unknown client");
        let client_id = Uuid::parse_str(client_id).map_err(|_| unknown())?;
        self.store
            .application_by_client_id(&client_id)
            .await?
            .ok_or_else(unknown)
    }

    async fn issue_code(
        &self,
        grant: &OAuth2Grant,
        mut redirect: Url,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url, AuthorizeError> {
        let code = generate_token()
            .map_err(|err| AuthorizeError::redirecting_server_error(&*err, &redirect, state))?;
        self.store
            .insert_authorization_code(AuthorizationCode {
                code_hash: hash_token(&code),
                grant_id: grant.id,
                redirect_uri: redirect_uri.to_string(),
                expires_at: Utc::now() + self.config.code_ttl(),
                used: false,
            })
            .await
            .map_err(|err| AuthorizeError::redirecting_server_error(&err, &redirect, state))?;
        redirect
            .query_pairs_mut()
            .append_pair("code", &code)
            .append_pair("state", state);
        Ok(redirect)
    }
}

fn parse_trusted_redirect(redirect_uri: &str) -> Result<Url, AuthorizeError> {
    Url::parse(redirect_uri).map_err(|_| {
        AuthorizeError::new(
            AuthorizeErrorCode::InvalidRequest,
            "registered redirect_uri is malformed",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::oauth::memory::MemoryOAuthStore;
    use crate::session::MemorySessionStore;
    use anyhow::Result;

    const REDIRECT: &str = "https://client/cb";

    struct Fixture {
        flow: AuthorizationFlow,
        client_id: String,
        secret: SecretString,
    }

    async fn fixture() -> Result<Fixture> {
        let flow = AuthorizationFlow::new(
            Arc::new(MemoryOAuthStore::new()),
            Arc::new(MemorySessionStore::default()),
            OAuthConfig::default(),
        );
        let registered = flow
            .register_application(1, "client", vec![REDIRECT.to_string()])
            .await?;
        Ok(Fixture {
            flow,
            client_id: registered.application.client_id.to_string(),
            secret: registered.client_secret,
        })
    }

    fn request(client_id: &str, redirect_uri: &str, response_type: &str) -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            response_type: response_type.to_string(),
            state: "xyz".to_string(),
        }
    }

    fn consent(client_id: &str, approved: bool) -> ConsentForm {
        ConsentForm {
            client_id: client_id.to_string(),
            redirect_uri: REDIRECT.to_string(),
            state: "xyz".to_string(),
            approved,
        }
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn config_defaults() {
        let config = OAuthConfig::default();
        assert_eq!(config.access_token_ttl_seconds(), 3600);
        assert_eq!(config.code_ttl_seconds(), 600);
        let config = config.with_access_token_ttl(0).with_code_ttl(30);
        assert_eq!(config.access_token_ttl_seconds(), 3600);
        assert_eq!(config.code_ttl_seconds(), 30);
    }

    #[tokio::test]
    async fn registration_requires_absolute_redirects() -> Result<()> {
        let fx = fixture().await?;
        assert!(fx
            .flow
            .register_application(1, "bad", vec!["/relative".to_string()])
            .await
            .is_err());
        assert!(fx.flow.register_application(1, "none", Vec::new()).await.is_err());
        assert!(fx
            .flow
            .register_application(1, " ", vec![REDIRECT.to_string()])
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_client_is_rejected_without_redirect() -> Result<()> {
        let fx = fixture().await?;
        let session = SessionKey::new("s1");
        let unregistered = Uuid::new_v4().to_string();
        for client_id in ["not-a-uuid", unregistered.as_str()] {
            let err = fx
                .flow
                .authorize(&session, 7, request(client_id, REDIRECT, "code"))
                .await
                .err()
                .ok_or_else(|| anyhow!("expected error"))?;
            assert_eq!(err.code, AuthorizeErrorCode::UnauthorizedClient);
            assert!(err.redirect().is_none());
        }
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_response_type_redirects_with_state() -> Result<()> {
        let fx = fixture().await?;
        let err = fx
            .flow
            .authorize(&SessionKey::new("s1"), 7, request(&fx.client_id, REDIRECT, "token"))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(err.code, AuthorizeErrorCode::UnsupportedResponseType);
        let url = err.redirect().ok_or_else(|| anyhow!("expected redirect"))?;
        assert_eq!(query(&url, "error").as_deref(), Some("unsupported_response_type"));
        assert_eq!(query(&url, "state").as_deref(), Some("xyz"));
        Ok(())
    }

    #[tokio::test]
    async fn consent_mismatch_fails_closed() -> Result<()> {
        let fx = fixture().await?;
        let session = SessionKey::new("s1");
        fx.flow
            .authorize(&session, 7, request(&fx.client_id, REDIRECT, "code"))
            .await?;

        let mut form = consent(&fx.client_id, true);
        form.state = "forged".to_string();
        let err = fx
            .flow
            .grant_consent(&session, 7, form)
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(err.redirect().is_none());

        // The binding was consumed by the failed attempt.
        let err = fx
            .flow
            .grant_consent(&session, 7, consent(&fx.client_id, true))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(err.code, AuthorizeErrorCode::InvalidRequest);
        Ok(())
    }

    #[tokio::test]
    async fn denied_consent_redirects_with_access_denied() -> Result<()> {
        let fx = fixture().await?;
        let session = SessionKey::new("s1");
        fx.flow
            .authorize(&session, 7, request(&fx.client_id, REDIRECT, "code"))
            .await?;
        let err = fx
            .flow
            .grant_consent(&session, 7, consent(&fx.client_id, false))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(err.code, AuthorizeErrorCode::AccessDenied);
        let url = err.redirect().ok_or_else(|| anyhow!("expected redirect"))?;
        assert_eq!(query(&url, "error").as_deref(), Some("access_denied"));

        // No grant was recorded, so the token endpoint refuses.
        let err = fx
            .flow
            .token(TokenRequest {
                client_id: fx.client_id.clone(),
                client_secret: fx.secret.clone(),
                user_id: 7,
                code: None,
            })
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(err.error, AccessTokenErrorCode::UnauthorizedClient);
        Ok(())
    }

    #[tokio::test]
    async fn existing_grant_skips_consent() -> Result<()> {
        let fx = fixture().await?;
        let session = SessionKey::new("s1");
        fx.flow
            .authorize(&session, 7, request(&fx.client_id, REDIRECT, "code"))
            .await?;
        fx.flow
            .grant_consent(&session, 7, consent(&fx.client_id, true))
            .await?;

        let outcome = fx
            .flow
            .authorize(&session, 7, request(&fx.client_id, REDIRECT, "code"))
            .await?;
        let AuthorizeOutcome::Redirect(url) = outcome else {
            return Err(anyhow!("expected redirect, got {outcome:?}"));
        };
        assert!(query(&url, "code").is_some());
        assert_eq!(query(&url, "state").as_deref(), Some("xyz"));

        // Another user still has to consent.
        let outcome = fx
            .flow
            .authorize(&session, 8, request(&fx.client_id, REDIRECT, "code"))
            .await?;
        assert!(matches!(outcome, AuthorizeOutcome::ConsentRequired(_)));
        Ok(())
    }

    #[tokio::test]
    async fn secret_mismatch_and_missing_grant_look_the_same() -> Result<()> {
        let fx = fixture().await?;
        let bad_secret = fx
            .flow
            .token(TokenRequest {
                client_id: fx.client_id.clone(),
                client_secret: SecretString::from("wrong".to_string()),
                user_id: 7,
                code: None,
            })
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        let no_grant = fx
            .flow
            .token(TokenRequest {
                client_id: fx.client_id.clone(),
                client_secret: fx.secret.clone(),
                user_id: 7,
                code: None,
            })
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(bad_secret, no_grant);
        assert_eq!(bad_secret.kind(), ErrorKind::Unauthorized);

        let unknown = fx
            .flow
            .token(TokenRequest {
                client_id: Uuid::new_v4().to_string(),
                client_secret: fx.secret.clone(),
                user_id: 7,
                code: None,
            })
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(unknown.error, AccessTokenErrorCode::InvalidClient);
        Ok(())
    }

    #[tokio::test]
    async fn code_is_single_use() -> Result<()> {
        let fx = fixture().await?;
        let session = SessionKey::new("s1");
        fx.flow
            .authorize(&session, 7, request(&fx.client_id, REDIRECT, "code"))
            .await?;
        let url = fx
            .flow
            .grant_consent(&session, 7, consent(&fx.client_id, true))
            .await?;
        let code = query(&url, "code").ok_or_else(|| anyhow!("missing code"))?;

        let exchange = |redirect_uri: &str| TokenRequest {
            client_id: fx.client_id.clone(),
            client_secret: fx.secret.clone(),
            user_id: 7,
            code: Some(CodeExchange {
                code: code.clone(),
                redirect_uri: redirect_uri.to_string(),
            }),
        };

        let wrong_uri = fx
            .flow
            .token(exchange("https://client/other"))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(wrong_uri.error, AccessTokenErrorCode::InvalidGrant);

        let issued = fx.flow.token(exchange(REDIRECT)).await?;
        assert_eq!(issued.response.token_type, "bearer");

        let replay = fx
            .flow
            .token(exchange(REDIRECT))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert_eq!(replay.error, AccessTokenErrorCode::InvalidGrant);
        Ok(())
    }

    #[tokio::test]
    async fn issued_tokens_validate_until_expiry() -> Result<()> {
        let fx = fixture().await?;
        let session = SessionKey::new("s1");
        fx.flow
            .authorize(&session, 7, request(&fx.client_id, REDIRECT, "code"))
            .await?;
        fx.flow
            .grant_consent(&session, 7, consent(&fx.client_id, true))
            .await?;
        let issued = fx
            .flow
            .token(TokenRequest {
                client_id: fx.client_id.clone(),
                client_secret: fx.secret.clone(),
                user_id: 7,
                code: None,
            })
            .await?;

        let record = fx
            .flow
            .validate_access_token(&issued.response.access_token)
            .await?
            .ok_or_else(|| anyhow!("token should validate"))?;
        assert_eq!(record.user_id, 7);
        assert_eq!(record.valid_until, issued.valid_until);
        assert!(fx.flow.validate_access_token("bogus").await?.is_none());
        Ok(())
    }

    /// Memory store whose code inserts always fail.
    #[derive(Default)]
    struct BrokenCodeStore {
        inner: MemoryOAuthStore,
    }

    #[async_trait::async_trait]
    impl OAuthStore for BrokenCodeStore {
        async fn create_application(
            &self,
            application: NewApplication,
        ) -> Result<OAuth2Application, StoreError> {
            self.inner.create_application(application).await
        }

        async fn application_by_client_id(
            &self,
            client_id: &Uuid,
        ) -> Result<Option<OAuth2Application>, StoreError> {
            self.inner.application_by_client_id(client_id).await
        }

        async fn grant_for_user(
            &self,
            application_id: i64,
            user_id: i64,
        ) -> Result<Option<OAuth2Grant>, StoreError> {
            self.inner.grant_for_user(application_id, user_id).await
        }

        async fn create_grant(
            &self,
            application_id: i64,
            user_id: i64,
        ) -> Result<OAuth2Grant, StoreError> {
            self.inner.create_grant(application_id, user_id).await
        }

        async fn insert_authorization_code(
            &self,
            _code: AuthorizationCode,
        ) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn consume_authorization_code(
            &self,
            code_hash: &[u8],
            grant_id: i64,
            redirect_uri: &str,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner
                .consume_authorization_code(code_hash, grant_id, redirect_uri, now)
                .await
        }

        async fn insert_access_token(&self, token: AccessToken) -> Result<(), StoreError> {
            self.inner.insert_access_token(token).await
        }

        async fn access_token_by_hash(
            &self,
            token_hash: &[u8],
        ) -> Result<Option<AccessToken>, StoreError> {
            self.inner.access_token_by_hash(token_hash).await
        }
    }

    #[tokio::test]
    async fn store_failures_redirect_once_uri_is_trusted() -> Result<()> {
        let flow = AuthorizationFlow::new(
            Arc::new(BrokenCodeStore::default()),
            Arc::new(MemorySessionStore::default()),
            OAuthConfig::default(),
        );
        let client_id = flow
            .register_application(1, "client", vec![REDIRECT.to_string()])
            .await?
            .application
            .client_id
            .to_string();
        let session = SessionKey::new("s1");
        flow.authorize(&session, 7, request(&client_id, REDIRECT, "code"))
            .await?;

        let from_consent = flow
            .grant_consent(&session, 7, consent(&client_id, true))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        // The grant is recorded, so the next authorize goes straight to issuing.
        let from_authorize = flow
            .authorize(&session, 7, request(&client_id, REDIRECT, "code"))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;

        for err in [from_consent, from_authorize] {
            assert_eq!(err.code, AuthorizeErrorCode::ServerError);
            assert_eq!(err.kind(), ErrorKind::ServerError);
            let url = err.redirect().ok_or_else(|| anyhow!("expected redirect"))?;
            assert_eq!(url.host_str(), Some("client"));
            assert_eq!(url.path(), "/cb");
            assert_eq!(query(&url, "error").as_deref(), Some("server_error"));
            assert_eq!(query(&url, "state").as_deref(), Some("xyz"));
            assert!(query(&url, "code").is_none());
        }
        Ok(())
    }
}
