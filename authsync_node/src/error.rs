use authsync_core::KeyTreeError;

/// Errors raised by the manager, the worker and the wire protocol.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Tree(#[from] KeyTreeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Codec(#[from] serde_json::Error),

    /// A message of unexpected shape arrived on a control or broadcast channel.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No broadcast snapshot has been persisted yet.
    #[error("no broadcast snapshot on disk")]
    SnapshotMissing,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
