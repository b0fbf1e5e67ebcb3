pub mod migrate;
pub mod register_client;

// Dispatch for `Action` lives in `run` so this module stays a list of variants.
mod run;

#[derive(Debug)]
pub enum Action {
    Migrate(migrate::Args),
    RegisterClient(register_client::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
