use anyhow::Result;
use authsync_node::AuthSyncConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Role;

pub async fn run_start(role: Role, config: &AuthSyncConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down.");
            on_signal.cancel();
        }
    });

    match role {
        Role::Manager => authsync_node::run_manager(config, cancel).await,
        Role::Worker => authsync_node::run_worker(config, cancel).await,
    }
}
