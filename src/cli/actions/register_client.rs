use crate::db;
use crate::oauth::{AuthorizationFlow, OAuthConfig, PgOAuthStore};
use crate::session::MemorySessionStore;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub dsn: SecretString,
    pub owner_id: i64,
    pub name: String,
    pub redirect_uris: Vec<String>,
}

/// Register an OAuth2 client and print its credentials.
///
/// The secret is shown once; only its hash is stored.
/// # Errors
/// Returns an error if the database is unreachable or the registration is rejected.
pub async fn execute(args: Args) -> Result<()> {
    let pool = db::connect(&args.dsn).await?;
    let store = PgOAuthStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to prepare oauth schema")?;

    let flow = AuthorizationFlow::new(
        Arc::new(store),
        Arc::new(MemorySessionStore::default()),
        OAuthConfig::default(),
    );
    let registered = flow
        .register_application(args.owner_id, &args.name, args.redirect_uris)
        .await?;

    println!("client_id: {}", registered.application.client_id);
    println!(
        "client_secret: {}",
        registered.client_secret.expose_secret()
    );
    Ok(())
}
