//! Error and sentinel types shared by every queue backend.

/// Sentinel reported when a backend does not expose a bounded capacity,
/// or cannot compute a size, for a given storage dimension.
pub const SIZE_NOT_SUPPORTED: i64 = -1;

/// Errors returned by queue operations.
///
/// Capacity errors ([`QueueFull`](QueueError::QueueFull),
/// [`EphemeralFull`](QueueError::EphemeralFull)) are recoverable: retry
/// later or drain consumers. [`OperationNotSupported`](QueueError::OperationNotSupported)
/// signals a caller bug. [`Storage`](QueueError::Storage) and
/// [`Codec`](QueueError::Codec) propagate durable-backend failures
/// unchanged; the in-memory backend never produces them.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The invoked operation is not supported by this instance,
    /// e.g. requeue on a queue with ephemeral storage disabled.
    #[error("operation not supported")]
    OperationNotSupported,
    /// Queue storage is full and cannot accept any more messages.
    #[error("queue storage is full")]
    QueueFull,
    /// Ephemeral storage is full. The head of the queue was left untouched.
    #[error("ephemeral storage is full")]
    EphemeralFull,
    /// Failure propagated from the underlying storage engine.
    #[error("storage backend error: {0}")]
    Storage(#[source] anyhow::Error),
    /// A stored record could not be encoded or decoded.
    #[error("message codec error: {0}")]
    Codec(#[source] anyhow::Error),
}

impl QueueError {
    /// Wraps a storage-engine failure.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }

    /// Wraps a record encode/decode failure.
    pub fn codec(err: impl Into<anyhow::Error>) -> Self {
        Self::Codec(err.into())
    }
}
