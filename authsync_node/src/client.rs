use std::io;

use authsync_core::{KeyRecord, KeyTree};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{self, Connection, ControlReply, ControlRequest};

/// Request/reply client for a manager's control endpoint.
pub struct ControlClient {
    conn: Connection,
}

impl ControlClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> SyncResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            conn: protocol::framed(stream),
        })
    }

    pub async fn request(&mut self, request: &ControlRequest) -> SyncResult<ControlReply> {
        self.conn.send(protocol::encode(request)?).await?;
        let frame = self.conn.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "manager closed the connection")
        })??;
        protocol::decode(&frame)
    }

    /// Submits a fragment for merging. `true` means `ACK`.
    pub async fn add(&mut self, fragment: KeyTree) -> SyncResult<bool> {
        self.expect_ack(&ControlRequest::Add(fragment)).await
    }

    /// Adds a single key at `path`.
    pub async fn add_key(&mut self, path: &str, record: KeyRecord) -> SyncResult<bool> {
        self.add(KeyTree::from_path(path, record)?).await
    }

    pub async fn delete(&mut self, path: &str) -> SyncResult<bool> {
        self.expect_ack(&ControlRequest::Del(path.to_owned())).await
    }

    pub async fn list(&mut self) -> SyncResult<KeyTree> {
        match self.request(&ControlRequest::List).await? {
            ControlReply::List(tree) => Ok(tree),
            other => Err(SyncError::ProtocolViolation(format!(
                "expected LIST reply, got {other:?}"
            ))),
        }
    }

    async fn expect_ack(&mut self, request: &ControlRequest) -> SyncResult<bool> {
        match self.request(request).await? {
            ControlReply::Ack => Ok(true),
            ControlReply::Fail => Ok(false),
            other => Err(SyncError::ProtocolViolation(format!(
                "expected ACK or FAIL, got {other:?}"
            ))),
        }
    }
}
