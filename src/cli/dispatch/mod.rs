//! Maps parsed arguments to an [`Action`].

use crate::cli::actions::{migrate, register_client, Action};
use crate::cli::commands::{self, migrate as migrate_cmd, register_client as register_cmd};
use crate::credentials::encoding::PublicKeyEncoding;
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing or no subcommand was given.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --dsn")?;

    match matches.subcommand() {
        Some((migrate_cmd::NAME, sub)) => Ok(Action::Migrate(migrate::Args {
            dsn,
            page_size: sub
                .get_one::<i64>(migrate_cmd::ARG_PAGE_SIZE)
                .copied()
                .unwrap_or_default(),
            encoding: sub
                .get_one::<PublicKeyEncoding>(migrate_cmd::ARG_KEY_ENCODING)
                .copied()
                .unwrap_or_default(),
        })),
        Some((register_cmd::NAME, sub)) => Ok(Action::RegisterClient(register_client::Args {
            dsn,
            owner_id: sub
                .get_one::<i64>(register_cmd::ARG_OWNER)
                .copied()
                .context("missing required argument: --owner")?,
            name: sub
                .get_one::<String>(register_cmd::ARG_NAME)
                .cloned()
                .context("missing required argument: --name")?,
            redirect_uris: sub
                .get_many::<String>(register_cmd::ARG_REDIRECT_URI)
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
        })),
        Some((other, _)) => Err(anyhow!("unknown subcommand: {other}")),
        None => Err(anyhow!("missing subcommand")),
    }
}
