//! The abstract queue contract every backend honours.
//!
//! Defines [`MessageQueue`], the capability set clients hold instead of a
//! concrete backend. All operations are synchronous blocking calls; any
//! operation may block on the instance's locks and, for durable backends,
//! on the KV store's own locking and disk I/O. There are no timeouts at
//! this layer; callers wrap calls with external deadlines if required.

use crate::error::QueueError;
use crate::message::QueueMessage;

/// FIFO, at-least-once message queue backed by pluggable storage.
///
/// A queue instance owns two partitions:
///
/// - **queue storage**: messages awaiting consumption, taken from the
///   head and appended at the tail;
/// - **ephemeral storage** (optional): messages currently being processed
///   by some consumer, keyed by id. Messages left here past a threshold
///   are *orphans*, recoverable via [`orphan_messages`](MessageQueue::orphan_messages).
///
/// Usage flow: [`enqueue`](MessageQueue::enqueue) messages, then
/// [`take`](MessageQueue::take) one, process it, and either
/// [`finish`](MessageQueue::finish) it (done) or
/// [`requeue`](MessageQueue::requeue) it (retry).
///
/// Implementations are shared across threads as `Arc<dyn MessageQueue>`.
pub trait MessageQueue: Send + Sync {
    /// Queue name, used for storage namespacing.
    fn name(&self) -> &str;

    /// Maximum number of messages queue storage can hold, or
    /// [`SIZE_NOT_SUPPORTED`](crate::SIZE_NOT_SUPPORTED) when unlimited.
    fn queue_capacity(&self) -> i64;

    /// Maximum number of messages ephemeral storage can hold, or
    /// [`SIZE_NOT_SUPPORTED`](crate::SIZE_NOT_SUPPORTED) when unlimited
    /// or when ephemeral storage is disabled.
    fn ephemeral_capacity(&self) -> i64;

    /// Whether taken messages are retained in ephemeral storage.
    fn is_ephemeral_enabled(&self) -> bool;

    /// Puts a message at the tail of queue storage.
    ///
    /// The backend stores a deep clone with the id assigned (backends
    /// differ on whether a caller-provided id is honoured),
    /// `queue_timestamp` set to now, `taken_timestamp` cleared, and the
    /// requeue counter reset. The stored clone is returned so the caller
    /// learns the assigned id.
    ///
    /// Fails with [`QueueError::QueueFull`] when queue storage is at
    /// capacity; nothing is mutated in that case.
    fn enqueue(&self, msg: &QueueMessage) -> Result<QueueMessage, QueueError>;

    /// Removes the message at the head of queue storage, stamps its
    /// `taken_timestamp`, moves it into ephemeral storage (when enabled),
    /// and returns it. Returns `Ok(None)` when queue storage is empty.
    ///
    /// Fails with [`QueueError::EphemeralFull`] when ephemeral storage is
    /// at capacity; the head of the queue is left untouched.
    fn take(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Signals that processing completed: removes the message from
    /// ephemeral storage. Unknown ids are not an error (idempotent), and
    /// the call is a no-op when ephemeral storage is disabled.
    fn finish(&self, id: &str) -> Result<(), QueueError>;

    /// Moves a message from ephemeral storage back to the tail of queue
    /// storage, clearing its `taken_timestamp`. With `silent == false`
    /// the queue timestamp is refreshed and the requeue counter bumped;
    /// with `silent == true` both are preserved.
    ///
    /// Returns the re-queued clone, or `Ok(None)` when the id is not in
    /// ephemeral storage. Fails with [`QueueError::OperationNotSupported`]
    /// when ephemeral storage is disabled.
    fn requeue(&self, id: &str, silent: bool) -> Result<Option<QueueMessage>, QueueError>;

    /// Returns deep copies of ephemeral messages whose `taken_timestamp`
    /// is more than `num_seconds` seconds in the past, i.e. messages
    /// whose consumer likely disappeared.
    ///
    /// `num_messages == 0` means no limit; otherwise at most that many
    /// matches are returned. Iteration order is backend-specific and not
    /// part of the contract. Returns an empty list when ephemeral storage
    /// is disabled. Read-only.
    fn orphan_messages(
        &self,
        num_seconds: u64,
        num_messages: usize,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Number of messages currently in queue storage, or
    /// [`SIZE_NOT_SUPPORTED`](crate::SIZE_NOT_SUPPORTED) when the backend
    /// cannot compute it.
    fn queue_size(&self) -> Result<i64, QueueError>;

    /// Number of messages currently in ephemeral storage, or
    /// [`SIZE_NOT_SUPPORTED`](crate::SIZE_NOT_SUPPORTED) when ephemeral
    /// storage is disabled or the count is not computable.
    fn ephemeral_size(&self) -> Result<i64, QueueError>;

    /// Releases underlying resources (closes the KV store, drops
    /// in-memory structures) and marks the instance uninitialised.
    /// A destroyed instance must not be reused.
    fn destroy(&self);
}
