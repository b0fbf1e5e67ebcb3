use anyhow::{anyhow, Result};
use latchkey::error::ErrorKind;
use latchkey::oauth::{
    AuthorizationFlow, AuthorizeErrorCode, AuthorizeOutcome, AuthorizeRequest, CodeExchange,
    ConsentForm, MemoryOAuthStore, OAuthConfig, TokenRequest,
};
use latchkey::session::{MemorySessionStore, SessionKey};
use secrecy::SecretString;
use std::sync::Arc;
use url::Url;

const REDIRECT: &str = "https://client/cb";
const USER: i64 = 1001;

fn flow(config: OAuthConfig) -> AuthorizationFlow {
    AuthorizationFlow::new(
        Arc::new(MemoryOAuthStore::new()),
        Arc::new(MemorySessionStore::default()),
        config,
    )
}

fn authorize_request(client_id: &str, redirect_uri: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        client_id: client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        response_type: "code".to_string(),
        state: "xyz".to_string(),
    }
}

fn param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn authorization_code_grant_end_to_end() -> Result<()> {
    let flow = flow(OAuthConfig::new().with_access_token_ttl(900));
    let app = flow
        .register_application(1, "client", vec![REDIRECT.to_string()])
        .await?;
    let client_id = app.application.client_id.to_string();
    let session = SessionKey::new("browser-session");

    let outcome = flow
        .authorize(&session, USER, authorize_request(&client_id, REDIRECT))
        .await?;
    let AuthorizeOutcome::ConsentRequired(prompt) = outcome else {
        return Err(anyhow!("first authorization must ask for consent"));
    };
    assert_eq!(prompt.application_name, "client");
    assert_eq!(prompt.state, "xyz");

    let redirect = flow
        .grant_consent(
            &session,
            USER,
            ConsentForm {
                client_id: prompt.client_id,
                redirect_uri: prompt.redirect_uri,
                state: prompt.state,
                approved: true,
            },
        )
        .await?;
    assert_eq!(redirect.scheme(), "https");
    assert_eq!(redirect.host_str(), Some("client"));
    assert_eq!(redirect.path(), "/cb");
    assert_eq!(param(&redirect, "state").as_deref(), Some("xyz"));
    let code = param(&redirect, "code").ok_or_else(|| anyhow!("redirect carries no code"))?;

    let issued = flow
        .token(TokenRequest {
            client_id: client_id.clone(),
            client_secret: app.client_secret.clone(),
            user_id: USER,
            code: Some(CodeExchange {
                code,
                redirect_uri: REDIRECT.to_string(),
            }),
        })
        .await?;
    assert_eq!(issued.response.token_type, "bearer");
    assert_eq!(issued.response.expires_in, 900);
    assert_eq!(
        issued.valid_until - issued.issued_at,
        chrono::Duration::seconds(900)
    );

    let record = flow
        .validate_access_token(&issued.response.access_token)
        .await?
        .ok_or_else(|| anyhow!("issued token must validate"))?;
    assert_eq!(record.user_id, USER);

    // The grant now exists, so consent is skipped.
    let outcome = flow
        .authorize(&session, USER, authorize_request(&client_id, REDIRECT))
        .await?;
    assert!(matches!(outcome, AuthorizeOutcome::Redirect(_)));
    Ok(())
}

#[tokio::test]
async fn redirect_uri_must_match_exactly() -> Result<()> {
    let flow = flow(OAuthConfig::default());
    let app = flow
        .register_application(1, "client", vec![REDIRECT.to_string()])
        .await?;
    let client_id = app.application.client_id.to_string();
    let session = SessionKey::new("browser-session");

    for candidate in [
        "https://client/cb/",
        "https://client/c",
        "https://client/cb?x=1",
        "https://client/cb#frag",
        "http://client/cb",
        "https://client.evil/cb",
        "https://evil/https://client/cb",
        "HTTPS://client/cb",
        "https://client",
        "",
    ] {
        let err = flow
            .authorize(&session, USER, authorize_request(&client_id, candidate))
            .await
            .err()
            .ok_or_else(|| anyhow!("{candidate:?} must be rejected"))?;
        assert_eq!(err.code, AuthorizeErrorCode::InvalidRequest, "{candidate}");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(err.redirect().is_none(), "{candidate}");
    }
    Ok(())
}

#[tokio::test]
async fn token_requires_grant_and_secret() -> Result<()> {
    let flow = flow(OAuthConfig::default());
    let app = flow
        .register_application(1, "client", vec![REDIRECT.to_string()])
        .await?;
    let client_id = app.application.client_id.to_string();

    let err = flow
        .token(TokenRequest {
            client_id: client_id.clone(),
            client_secret: SecretString::from("guess".to_string()),
            user_id: USER,
            code: None,
        })
        .await
        .err()
        .ok_or_else(|| anyhow!("wrong secret must fail"))?;
    assert_eq!(err.error.as_str(), "unauthorized_client");

    let err = flow
        .token(TokenRequest {
            client_id,
            client_secret: app.client_secret.clone(),
            user_id: USER,
            code: None,
        })
        .await
        .err()
        .ok_or_else(|| anyhow!("missing grant must fail"))?;
    assert_eq!(err.error.as_str(), "unauthorized_client");
    Ok(())
}
