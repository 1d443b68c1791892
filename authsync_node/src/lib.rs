use anyhow::Context;
use tokio_util::sync::CancellationToken;

pub mod client;
pub mod config;
mod error;
pub mod manager;
pub mod protocol;
pub mod worker;

pub use client::ControlClient;
pub use config::AuthSyncConfig;
pub use error::{SyncError, SyncResult};
pub use manager::{Manager, ManagerService, Publisher};
pub use worker::{Worker, WorkerService};

/// Runs the manager role until `cancel` fires.
pub async fn run_manager(config: &AuthSyncConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let service = ManagerService::bind(config)
        .await
        .context("failed to bind manager sockets")?;
    service.run(cancel).await
}

/// Runs the worker role until `cancel` fires.
pub async fn run_worker(config: &AuthSyncConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    WorkerService::new(config).run(cancel).await
}
