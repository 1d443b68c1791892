use std::net::SocketAddr;

use anyhow::{Context, anyhow};
use authsync_core::{Delta, KeyStore, KeyTree, KeyTreeError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AuthSyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{self, BroadcastMessage, ControlReply, ControlRequest};

/// Frames buffered per subscriber before a slow worker starts skipping.
const BROADCAST_CAPACITY: usize = 256;
const REQUEST_QUEUE: usize = 64;

/// Fan-out side of the broadcast channel.
///
/// Each message is encoded once; every connected worker gets the same frame.
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: broadcast::Sender<Bytes>,
}

impl Publisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes `message`, returning how many subscribers it reached.
    pub fn publish(&self, message: &BroadcastMessage) -> SyncResult<usize> {
        let frame = protocol::encode(message)?;
        match self.sender.send(frame) {
            Ok(count) => Ok(count),
            Err(_) => {
                debug!("no workers connected, broadcast dropped");
                Ok(0)
            }
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the authoritative store and the last-broadcast snapshot.
///
/// The store is reloaded from disk for every operation.
#[derive(Debug)]
pub struct Manager {
    store: KeyStore,
    snapshot: KeyStore,
    publisher: Publisher,
}

impl Manager {
    pub fn new(store: KeyStore, snapshot: KeyStore, publisher: Publisher) -> Self {
        Self {
            store,
            snapshot,
            publisher,
        }
    }

    /// Handles one control request.
    ///
    /// Failures are logged here; the client only learns `FAIL`.
    pub fn handle(&self, request: ControlRequest) -> ControlReply {
        let result = match request {
            ControlRequest::Add(fragment) => self.add(fragment),
            ControlRequest::Del(path) => self.delete(&path),
            ControlRequest::List => return self.list_reply(),
        };
        match result {
            Ok(()) => ControlReply::Ack,
            Err(err) => {
                warn!("rejecting control request: {err}");
                ControlReply::Fail
            }
        }
    }

    fn list_reply(&self) -> ControlReply {
        match self.list() {
            Ok(tree) => ControlReply::List(tree),
            Err(err) => {
                warn!("failed to list keys: {err}");
                ControlReply::Fail
            }
        }
    }

    pub fn list(&self) -> SyncResult<KeyTree> {
        Ok(self.store.load()?)
    }

    /// Merges `fragment` into the store and broadcasts the change.
    pub fn add(&self, fragment: KeyTree) -> SyncResult<()> {
        let mut tree = self.store.load()?;
        tree.merge(fragment)?;
        self.commit(&tree)
    }

    /// Removes the leaf at `path` and broadcasts the change.
    pub fn delete(&self, path: &str) -> SyncResult<()> {
        let mut tree = self.store.load()?;
        tree.remove(path)?;
        self.commit(&tree)
    }

    fn commit(&self, tree: &KeyTree) -> SyncResult<()> {
        self.store.write(tree)?;
        info!(keys = tree.list_paths().len(), "key store updated");
        // The store already changed, so the request still succeeds. The next
        // broadcast diffs against the older snapshot and carries this change.
        if let Err(err) = self.broadcast(tree) {
            warn!("broadcast failed: {err}");
        }
        Ok(())
    }

    fn load_snapshot(&self) -> SyncResult<KeyTree> {
        self.snapshot
            .load_existing()?
            .ok_or(SyncError::SnapshotMissing)
    }

    /// Persists `current` as the new snapshot and publishes what changed
    /// since the previous one, or the full tree if there was none or it
    /// could not be parsed.
    pub fn broadcast(&self, current: &KeyTree) -> SyncResult<()> {
        let message = match self.load_snapshot() {
            Ok(previous) => BroadcastMessage::Delta(current.diff(&previous)),
            Err(SyncError::SnapshotMissing) => {
                info!("no broadcast snapshot, sending full update");
                BroadcastMessage::Update(current.clone())
            }
            Err(SyncError::Tree(
                err @ (KeyTreeError::MalformedLine { .. } | KeyTreeError::InvalidAlgorithm(_)),
            )) => {
                warn!("broadcast snapshot is unreadable, sending full update: {err}");
                BroadcastMessage::Update(current.clone())
            }
            Err(err) => return Err(err),
        };
        self.snapshot.write(current)?;
        if matches!(&message, BroadcastMessage::Delta(delta) if delta.is_empty()) {
            debug!("store unchanged since last broadcast");
            return Ok(());
        }
        let reached = self.publisher.publish(&message)?;
        debug!(workers = reached, "published broadcast");
        Ok(())
    }
}

type Job = (ControlRequest, oneshot::Sender<ControlReply>);

/// Network front of a [`Manager`]: the control endpoint and the publish port.
pub struct ManagerService {
    control: TcpListener,
    publish: TcpListener,
    manager: Manager,
    publisher: Publisher,
}

impl ManagerService {
    pub async fn bind(config: &AuthSyncConfig) -> SyncResult<Self> {
        let control = TcpListener::bind(config.control_bind_addr()).await?;
        let publish = TcpListener::bind(config.publish_bind_addr()).await?;
        let publisher = Publisher::new();
        let manager = Manager::new(
            KeyStore::new(&config.store.authorized_keys),
            KeyStore::new(&config.store.snapshot),
            publisher.clone(),
        );
        Ok(Self {
            control,
            publish,
            manager,
            publisher,
        })
    }

    pub fn control_addr(&self) -> SyncResult<SocketAddr> {
        Ok(self.control.local_addr()?)
    }

    pub fn publish_addr(&self) -> SyncResult<SocketAddr> {
        Ok(self.publish.local_addr()?)
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Serves until `cancel` fires.
    ///
    /// Requests from all control connections are queued to a single thread
    /// that owns the [`Manager`], so they are applied one at a time.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self {
            control,
            publish,
            manager,
            publisher,
        } = self;
        info!(
            control = ?control.local_addr()?,
            publish = ?publish.local_addr()?,
            "manager listening"
        );

        let (requests, mut jobs) = mpsc::channel::<Job>(REQUEST_QUEUE);
        let worker_thread = tokio::task::spawn_blocking(move || {
            while let Some((request, reply)) = jobs.blocking_recv() {
                debug!(?request, "control request");
                let _ = reply.send(manager.handle(request));
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = control.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "control client connected");
                        let requests = requests.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_control(stream, requests, cancel).await {
                                warn!(%peer, "control connection failed: {err:#}");
                            }
                        });
                    }
                    Err(err) => warn!("failed to accept control connection: {err}"),
                },
                accepted = publish.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "worker subscribed");
                        let frames = publisher.subscribe();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_subscriber(stream, frames, cancel).await {
                                warn!(%peer, "subscriber connection failed: {err:#}");
                            }
                            debug!(%peer, "worker unsubscribed");
                        });
                    }
                    Err(err) => warn!("failed to accept subscriber: {err}"),
                },
            }
        }

        drop(requests);
        worker_thread
            .await
            .context("manager request thread panicked")?;
        info!("manager stopped");
        Ok(())
    }
}

async fn serve_control(
    stream: TcpStream,
    requests: mpsc::Sender<Job>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut conn = protocol::framed(stream);
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = conn.next() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let reply = match protocol::decode::<ControlRequest>(&frame?) {
            Ok(request) => {
                let (reply, response) = oneshot::channel();
                requests
                    .send((request, reply))
                    .await
                    .map_err(|_| anyhow!("manager is shutting down"))?;
                response.await.context("manager dropped the request")?
            }
            Err(err) => {
                warn!("rejecting control request: {err}");
                ControlReply::Fail
            }
        };
        conn.send(protocol::encode(&reply)?).await?;
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    mut frames: broadcast::Receiver<Bytes>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut conn = protocol::framed(stream);
    // `frames` is already registered, so a worker that sees this empty delta
    // can resync without missing anything published afterwards.
    conn.send(protocol::encode(&BroadcastMessage::Delta(Delta::default()))?)
        .await?;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = frames.recv() => match frame {
                Ok(frame) => conn.send(frame).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "worker is lagging, broadcasts dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            // Workers never send; this only notices the hang-up.
            incoming = conn.next() => if incoming.is_none() {
                return Ok(());
            },
        }
    }
}
