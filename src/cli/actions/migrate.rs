use crate::credentials::encoding::PublicKeyEncoding;
use crate::credentials::{MigrationConfig, MigrationEngine, PgCredentialStore};
use crate::db;
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: SecretString,
    pub page_size: i64,
    pub encoding: PublicKeyEncoding,
}

/// Run the credential migration sweep against the configured database.
///
/// Must not overlap with live credential writes; schedule it before the web
/// layer starts serving.
/// # Errors
/// Returns an error if the database is unreachable or any row fails to migrate.
pub async fn execute(args: Args) -> Result<()> {
    let pool = db::connect(&args.dsn).await?;
    let store = Arc::new(PgCredentialStore::new(pool));
    let config = MigrationConfig::new()
        .with_page_size(args.page_size)
        .with_encoding(args.encoding);

    info!(
        page_size = config.page_size(),
        encoding = config.encoding().as_str(),
        "starting credential migration"
    );
    let report = MigrationEngine::new(store, config)
        .run()
        .await
        .context("credential migration failed")?;

    println!(
        "migrated {} credentials in {} pages",
        report.migrated, report.pages
    );
    Ok(())
}
