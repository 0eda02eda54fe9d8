//! Construction factories for queue backends.
//!
//! Callers hold the resulting `Arc<dyn MessageQueue>` capability set and
//! never a concrete backend, so in-memory and durable instances are
//! interchangeable at every call site.

use std::path::PathBuf;
use std::sync::Arc;

use conveyor_core::{MessageQueue, QueueError};

use crate::durable::DurableQueue;
use crate::memory::MemoryQueue;

/// Creates an in-memory queue.
///
/// Capacities that are zero or negative mean unlimited. State lives in
/// the process only.
#[must_use]
pub fn new_in_memory(
    name: impl Into<String>,
    queue_capacity: i64,
    ephemeral_disabled: bool,
    ephemeral_capacity: i64,
) -> Arc<dyn MessageQueue> {
    Arc::new(MemoryQueue::new(
        name,
        queue_capacity,
        ephemeral_disabled,
        ephemeral_capacity,
    ))
}

/// Creates a durable queue storing data under `<data_path>/<name>/`.
///
/// The underlying database is opened eagerly so that open failures
/// surface here instead of at the first operation.
pub fn new_durable(
    name: impl Into<String>,
    data_path: impl Into<PathBuf>,
    queue_capacity: i64,
    ephemeral_disabled: bool,
    ephemeral_capacity: i64,
) -> Result<Arc<dyn MessageQueue>, QueueError> {
    let queue = DurableQueue::new(
        name,
        data_path,
        queue_capacity,
        ephemeral_disabled,
        ephemeral_capacity,
    );
    queue.init()?;
    Ok(Arc::new(queue))
}

#[cfg(test)]
mod tests {
    use conveyor_core::QueueMessage;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn in_memory_factory_returns_working_queue() {
        let queue = new_in_memory("jobs", 0, false, 0);
        assert_eq!(queue.name(), "jobs");

        let stored = queue.enqueue(&QueueMessage::new(b"data".to_vec())).unwrap();
        let taken = queue.take().unwrap().unwrap();
        assert_eq!(taken.id, stored.id);
    }

    #[test]
    fn durable_factory_returns_working_queue() {
        let dir = TempDir::new().unwrap();
        let queue = new_durable("jobs", dir.path(), 0, false, 0).unwrap();
        assert_eq!(queue.name(), "jobs");

        queue.enqueue(&QueueMessage::new(b"data".to_vec())).unwrap();
        assert_eq!(queue.queue_size().unwrap(), 1);
        queue.destroy();
    }

    #[test]
    fn factories_create_independent_instances() {
        let a = new_in_memory("queue-a", 0, false, 0);
        let b = new_in_memory("queue-b", 0, false, 0);

        a.enqueue(&QueueMessage::new(b"only-a".to_vec())).unwrap();
        assert_eq!(a.queue_size().unwrap(), 1);
        assert_eq!(b.queue_size().unwrap(), 0, "queues should be independent");
    }
}
