use crate::cli::actions::{migrate, register_client, Action};
use anyhow::Result;

/// Single dispatch point for CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Migrate(args) => migrate::execute(args).await,
        Action::RegisterClient(args) => register_client::execute(args).await,
    }
}
