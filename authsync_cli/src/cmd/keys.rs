use anyhow::{Context, Result, bail};
use authsync_core::{KeyRecord, codec};
use authsync_node::{AuthSyncConfig, ControlClient};
use clap::Subcommand;
use tracing::info;

#[derive(Subcommand)]
pub enum CmdKeys {
    /// Print the manager's store in authorized_keys format
    List {
        /// Print one full path per key instead
        #[arg(long)]
        paths: bool,
    },
    /// Add a key, or replace the key already at PATH
    Add {
        /// Slash-separated location, e.g. admins/alice
        path: String,
        /// Public key line, e.g. "ssh-ed25519 AAAA... alice@laptop"
        key: String,
    },
    /// Remove the key at PATH; emptied groups are removed with it
    Del { path: String },
}

impl CmdKeys {
    pub async fn run(self, config: &AuthSyncConfig) -> Result<()> {
        let addr = config.control_addr();
        let mut client = ControlClient::connect(&addr)
            .await
            .with_context(|| format!("failed to reach manager at {addr}"))?;

        match self {
            Self::List { paths } => {
                let tree = client.list().await?;
                if paths {
                    for path in tree.list_paths() {
                        println!("{path}");
                    }
                } else {
                    print!("{}", codec::serialize(&tree));
                }
            }
            Self::Add { path, key } => {
                let record: KeyRecord = key.parse().context("invalid public key line")?;
                if !client.add_key(&path, record).await? {
                    bail!("manager refused to add {path:?}");
                }
                info!("added {path}");
            }
            Self::Del { path } => {
                if !client.delete(&path).await? {
                    bail!("manager refused to delete {path:?}");
                }
                info!("deleted {path}");
            }
        }
        Ok(())
    }
}
