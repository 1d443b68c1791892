use std::time::Duration;

use anyhow::{Context, anyhow};
use authsync_core::{KeyStore, KeyTree};
use bytes::BytesMut;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ControlClient;
use crate::config::AuthSyncConfig;
use crate::error::SyncResult;
use crate::protocol::{self, BroadcastMessage};

/// Applies manager broadcasts to a local store.
#[derive(Debug, Clone)]
pub struct Worker {
    store: KeyStore,
}

impl Worker {
    pub fn new(store: KeyStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Decodes and applies one broadcast frame.
    pub fn handle_frame(&self, frame: &[u8]) -> SyncResult<()> {
        let message = protocol::decode(frame)?;
        self.apply(message)
    }

    /// Applies a broadcast and persists the result.
    ///
    /// Deletions are applied one by one and kept even if merging the
    /// additions then fails; the merge error is returned after the write.
    pub fn apply(&self, message: BroadcastMessage) -> SyncResult<()> {
        match message {
            BroadcastMessage::Update(tree) => self.replace(&tree),
            BroadcastMessage::Delta(delta) if delta.is_empty() => Ok(()),
            BroadcastMessage::Delta(delta) => {
                debug!(
                    deleted = delta.deleted.len(),
                    added = delta.added.len(),
                    "applying delta"
                );
                let mut tree = self.store.load()?;
                let merged = delta.apply(&mut tree);
                self.store.write(&tree)?;
                Ok(merged?)
            }
        }
    }

    /// Replaces the local store wholesale.
    pub fn replace(&self, tree: &KeyTree) -> SyncResult<()> {
        self.store.write(tree)?;
        info!(keys = tree.list_paths().len(), "local store replaced");
        Ok(())
    }
}

/// Keeps a [`Worker`] subscribed to the manager, reconnecting as needed.
pub struct WorkerService {
    worker: Worker,
    broadcast_addr: String,
    resync_addr: Option<String>,
    reconnect_delay: Duration,
}

impl WorkerService {
    pub fn new(config: &AuthSyncConfig) -> Self {
        Self {
            worker: Worker::new(KeyStore::new(&config.store.authorized_keys)),
            broadcast_addr: config.broadcast_addr(),
            resync_addr: config
                .worker
                .resync_on_connect
                .then(|| config.control_addr()),
            reconnect_delay: config.reconnect_delay(),
        }
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                session = self.session() => match session {
                    Ok(()) => info!("manager closed the broadcast connection"),
                    Err(err) => warn!("broadcast connection failed: {err:#}"),
                },
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        info!("worker stopped");
        Ok(())
    }

    /// One connection to the manager, until it drops.
    async fn session(&self) -> anyhow::Result<()> {
        let stream = TcpStream::connect(&self.broadcast_addr)
            .await
            .with_context(|| format!("failed to connect to manager at {}", self.broadcast_addr))?;
        let mut conn = protocol::framed(stream);
        info!(manager = %self.broadcast_addr, "subscribed to broadcasts");

        // The manager greets each subscriber once it is registered; anything
        // published after that is queued here while the listing runs.
        if let Some(addr) = &self.resync_addr {
            let Some(greeting) = conn.next().await else {
                return Ok(());
            };
            self.deliver(greeting?).await;
            if let Err(err) = self.resync(addr).await {
                warn!(%addr, "resync failed, relying on broadcasts: {err:#}");
            }
        }

        while let Some(frame) = conn.next().await {
            self.deliver(frame?).await;
        }
        Ok(())
    }

    /// Applies one frame on the blocking pool; failures are logged and skipped.
    async fn deliver(&self, frame: BytesMut) {
        let worker = self.worker.clone();
        match tokio::task::spawn_blocking(move || worker.handle_frame(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("skipping broadcast: {err}"),
            Err(err) => warn!("broadcast handler did not finish: {err}"),
        }
    }

    async fn resync(&self, addr: &str) -> anyhow::Result<()> {
        let mut client = ControlClient::connect(addr).await?;
        let tree = client.list().await?;
        debug!(%addr, "resynchronising from manager listing");
        let worker = self.worker.clone();
        tokio::task::spawn_blocking(move || worker.replace(&tree))
            .await
            .map_err(|err| anyhow!("resync did not finish: {err}"))??;
        Ok(())
    }
}
