use std::path::PathBuf;

use anyhow::Result;
use authsync_node::AuthSyncConfig;

mod keys;
mod start;

pub use keys::CmdKeys;
pub use start::run_start;

pub async fn run_command(config_file: PathBuf, cmd: crate::Commands) -> Result<()> {
    match cmd {
        crate::Commands::Healthcheck => Ok(()),
        crate::Commands::Config { cmd } => cmd.run(&config_file),
        crate::Commands::Start { role } => {
            let config = AuthSyncConfig::load_or_init(&config_file)?;
            run_start(role, &config).await
        }
        crate::Commands::Keys { cmd } => {
            let config = AuthSyncConfig::load_or_init(&config_file)?;
            cmd.run(&config).await
        }
    }
}
