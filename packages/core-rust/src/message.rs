//! Queue message envelope.
//!
//! Defines [`QueueMessage`], the unit of storage for every backend. The
//! payload is opaque to the library; all metadata needed for FIFO
//! delivery, at-least-once redelivery, and orphan detection travels in
//! the envelope and survives serialization losslessly.

use serde::{Deserialize, Serialize};

use crate::clock::{ClockSource, SystemClock};
use crate::id::unique_id;

/// A message traveling through a queue.
///
/// At any observable instant a message sits in exactly one partition:
/// queue storage (`taken_timestamp == 0`) or ephemeral storage
/// (`taken_timestamp != 0`). Cloning deep-copies the payload, so callers
/// can never mutate bytes already handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Globally unique id, 32 lowercased hex characters.
    /// Empty means not yet assigned; backends assign one on enqueue.
    pub id: String,
    /// Creation instant, milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Instant the message was last placed into the queue partition.
    /// Overwritten on every enqueue and on non-silent requeue.
    pub queue_timestamp: u64,
    /// Instant the message was last moved into ephemeral storage.
    /// Zero whenever the message sits in the queue partition.
    pub taken_timestamp: u64,
    /// How many times the message has been non-silently requeued.
    pub num_requeues: u32,
    /// Opaque payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl QueueMessage {
    /// Creates a message with a freshly minted id, stamping creation and
    /// queue timestamps from the system clock.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_clock(payload, &SystemClock)
    }

    /// Creates a message with a caller-chosen id.
    ///
    /// Pre-set ids are honoured by the in-memory backend (deterministic
    /// tests, application-level idempotency keys); the durable backend
    /// discards them and mints its own.
    #[must_use]
    pub fn with_id(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            ..Self::new(payload)
        }
    }

    /// Creates a message stamping creation time from `clock`.
    #[must_use]
    pub fn with_clock(payload: Vec<u8>, clock: &dyn ClockSource) -> Self {
        let now = clock.now_millis();
        Self {
            id: unique_id(),
            timestamp: now,
            queue_timestamp: now,
            taken_timestamp: 0,
            num_requeues: 0,
            payload,
        }
    }

    /// Whether this message currently belongs to the queue partition.
    #[must_use]
    pub fn is_in_queue(&self) -> bool {
        self.taken_timestamp == 0
    }
}
