//! In-memory [`MessageQueue`] backend.
//!
//! Queue storage is a `VecDeque` (FIFO head-to-tail), ephemeral storage a
//! `HashMap` keyed by message id. All mutations are serialised under a
//! single mutex held for the duration of each operation, which keeps every
//! take/requeue/finish an atomic partition move by construction.
//!
//! State is local to the process; nothing survives a restart. Use the
//! durable backend for that.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use conveyor_core::{
    unique_id, ClockSource, MessageQueue, QueueError, QueueMessage, SystemClock,
    SIZE_NOT_SUPPORTED,
};

/// Returns `true` when `len` has reached a configured positive `capacity`.
fn at_capacity(len: usize, capacity: i64) -> bool {
    // Callers only pass positive capacities; the sentinel never reaches the cast.
    #[allow(clippy::cast_sign_loss)]
    let capacity = capacity as u64;
    len as u64 >= capacity
}

/// Normalises a configured capacity: zero or negative means unlimited and
/// is reported as [`SIZE_NOT_SUPPORTED`].
fn normalize_capacity(capacity: i64) -> i64 {
    if capacity <= 0 {
        SIZE_NOT_SUPPORTED
    } else {
        capacity
    }
}

/// Both partitions of an initialised in-memory queue.
#[derive(Default)]
struct MemoryInner {
    queue: VecDeque<QueueMessage>,
    ephemeral: HashMap<String, QueueMessage>,
}

/// In-memory queue backend.
///
/// If an enqueued message carries a non-empty id, that id is honoured;
/// otherwise a fresh one is minted. This supports deterministic tests and
/// application-level idempotency keys. Requeued messages always keep
/// their id.
pub struct MemoryQueue {
    name: String,
    queue_capacity: i64,
    ephemeral_capacity: i64,
    ephemeral_disabled: bool,
    clock: Arc<dyn ClockSource>,
    /// `None` until first use and after `destroy()`.
    inner: Mutex<Option<MemoryInner>>,
}

impl MemoryQueue {
    /// Creates an in-memory queue. Capacities that are zero or negative
    /// mean unlimited.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue_capacity: i64,
        ephemeral_disabled: bool,
        ephemeral_capacity: i64,
    ) -> Self {
        Self::with_clock(
            name,
            queue_capacity,
            ephemeral_disabled,
            ephemeral_capacity,
            Arc::new(SystemClock),
        )
    }

    /// Creates an in-memory queue stamping timestamps from `clock`.
    #[must_use]
    pub fn with_clock(
        name: impl Into<String>,
        queue_capacity: i64,
        ephemeral_disabled: bool,
        ephemeral_capacity: i64,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            name: name.into(),
            queue_capacity: normalize_capacity(queue_capacity),
            ephemeral_capacity: if ephemeral_disabled {
                SIZE_NOT_SUPPORTED
            } else {
                normalize_capacity(ephemeral_capacity)
            },
            ephemeral_disabled,
            clock,
            inner: Mutex::new(None),
        }
    }
}

impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_capacity(&self) -> i64 {
        self.queue_capacity
    }

    fn ephemeral_capacity(&self) -> i64 {
        self.ephemeral_capacity
    }

    fn is_ephemeral_enabled(&self) -> bool {
        !self.ephemeral_disabled
    }

    fn enqueue(&self, msg: &QueueMessage) -> Result<QueueMessage, QueueError> {
        let mut guard = self.inner.lock();
        let inner = guard.get_or_insert_with(MemoryInner::default);

        if self.queue_capacity > 0 && at_capacity(inner.queue.len(), self.queue_capacity) {
            return Err(QueueError::QueueFull);
        }

        let mut stored = msg.clone();
        if stored.id.is_empty() {
            stored.id = unique_id();
        }
        stored.queue_timestamp = self.clock.now_millis();
        stored.taken_timestamp = 0;
        stored.num_requeues = 0;

        inner.queue.push_back(stored.clone());
        Ok(stored)
    }

    fn take(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut guard = self.inner.lock();
        let inner = guard.get_or_insert_with(MemoryInner::default);

        if !self.ephemeral_disabled
            && self.ephemeral_capacity > 0
            && at_capacity(inner.ephemeral.len(), self.ephemeral_capacity)
        {
            return Err(QueueError::EphemeralFull);
        }

        let Some(mut msg) = inner.queue.pop_front() else {
            return Ok(None);
        };
        msg.taken_timestamp = self.clock.now_millis();
        if !self.ephemeral_disabled {
            inner.ephemeral.insert(msg.id.clone(), msg.clone());
        }
        Ok(Some(msg))
    }

    fn finish(&self, id: &str) -> Result<(), QueueError> {
        let mut guard = self.inner.lock();
        let inner = guard.get_or_insert_with(MemoryInner::default);
        inner.ephemeral.remove(id);
        Ok(())
    }

    fn requeue(&self, id: &str, silent: bool) -> Result<Option<QueueMessage>, QueueError> {
        if self.ephemeral_disabled {
            return Err(QueueError::OperationNotSupported);
        }

        let mut guard = self.inner.lock();
        let inner = guard.get_or_insert_with(MemoryInner::default);

        let Some(mut msg) = inner.ephemeral.remove(id) else {
            return Ok(None);
        };
        msg.taken_timestamp = 0;
        if !silent {
            msg.queue_timestamp = self.clock.now_millis();
            msg.num_requeues += 1;
        }
        inner.queue.push_back(msg.clone());
        Ok(Some(msg))
    }

    fn orphan_messages(
        &self,
        num_seconds: u64,
        num_messages: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        if self.ephemeral_disabled {
            return Ok(Vec::new());
        }

        let mut guard = self.inner.lock();
        let inner = guard.get_or_insert_with(MemoryInner::default);

        let now_seconds = self.clock.now_millis() / 1000;
        let mut result = Vec::new();
        for msg in inner.ephemeral.values() {
            if msg.taken_timestamp / 1000 + num_seconds < now_seconds {
                result.push(msg.clone());
                if num_messages > 0 && result.len() >= num_messages {
                    break;
                }
            }
        }
        Ok(result)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn queue_size(&self) -> Result<i64, QueueError> {
        let guard = self.inner.lock();
        Ok(guard.as_ref().map_or(0, |inner| inner.queue.len() as i64))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn ephemeral_size(&self) -> Result<i64, QueueError> {
        if self.ephemeral_disabled {
            return Ok(SIZE_NOT_SUPPORTED);
        }
        let guard = self.inner.lock();
        Ok(guard.as_ref().map_or(0, |inner| inner.ephemeral.len() as i64))
    }

    fn destroy(&self) {
        *self.inner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;
    use crate::test_support::FixedClock;

    fn unlimited() -> MemoryQueue {
        MemoryQueue::new("test", 0, false, 0)
    }

    #[test]
    fn enqueue_assigns_id_and_resets_metadata() {
        let queue = unlimited();
        let mut msg = QueueMessage::with_id("", b"hello".to_vec());
        msg.num_requeues = 7;
        msg.taken_timestamp = 42;

        let stored = queue.enqueue(&msg).unwrap();

        assert_eq!(stored.id.len(), 32);
        assert_eq!(stored.num_requeues, 0);
        assert_eq!(stored.taken_timestamp, 0);
        assert!(stored.queue_timestamp > 0);
        assert_eq!(stored.payload, b"hello");
    }

    #[test]
    fn enqueue_honours_preset_id() {
        let queue = unlimited();
        let stored = queue
            .enqueue(&QueueMessage::with_id("caller-key", b"x".to_vec()))
            .unwrap();
        assert_eq!(stored.id, "caller-key");
    }

    #[test]
    fn enqueue_at_capacity_fails_and_leaves_size_unchanged() {
        let queue = MemoryQueue::new("bounded", 2, false, 0);
        queue.enqueue(&QueueMessage::new(b"a".to_vec())).unwrap();
        queue.enqueue(&QueueMessage::new(b"b".to_vec())).unwrap();

        let err = queue.enqueue(&QueueMessage::new(b"c".to_vec())).unwrap_err();
        assert!(matches!(err, QueueError::QueueFull));
        assert_eq!(queue.queue_size().unwrap(), 2);
    }

    #[test]
    fn take_from_empty_returns_none() {
        let queue = unlimited();
        assert!(queue.take().unwrap().is_none());
    }

    #[test]
    fn take_is_fifo() {
        let queue = unlimited();
        for i in 0..10 {
            queue
                .enqueue(&QueueMessage::new(format!("m{i}").into_bytes()))
                .unwrap();
        }
        for i in 0..10 {
            let msg = queue.take().unwrap().unwrap();
            assert_eq!(msg.payload, format!("m{i}").into_bytes());
        }
        assert!(queue.take().unwrap().is_none());
    }

    #[test]
    fn take_moves_message_into_ephemeral() {
        let queue = unlimited();
        queue.enqueue(&QueueMessage::new(b"work".to_vec())).unwrap();

        let msg = queue.take().unwrap().unwrap();
        assert!(msg.taken_timestamp > 0);
        assert_eq!(queue.queue_size().unwrap(), 0);
        assert_eq!(queue.ephemeral_size().unwrap(), 1);
    }

    #[test]
    fn take_at_ephemeral_capacity_fails_and_preserves_head() {
        let queue = MemoryQueue::new("bounded", 0, false, 1);
        queue.enqueue(&QueueMessage::new(b"first".to_vec())).unwrap();
        queue.enqueue(&QueueMessage::new(b"second".to_vec())).unwrap();

        let first = queue.take().unwrap().unwrap();
        let err = queue.take().unwrap_err();
        assert!(matches!(err, QueueError::EphemeralFull));
        assert_eq!(queue.queue_size().unwrap(), 1);

        // Draining ephemeral unblocks the head, which is still "second".
        queue.finish(&first.id).unwrap();
        let second = queue.take().unwrap().unwrap();
        assert_eq!(second.payload, b"second");
    }

    #[test]
    fn finish_removes_from_ephemeral_and_is_idempotent() {
        let queue = unlimited();
        queue.enqueue(&QueueMessage::new(b"x".to_vec())).unwrap();
        let msg = queue.take().unwrap().unwrap();

        queue.finish(&msg.id).unwrap();
        assert_eq!(queue.ephemeral_size().unwrap(), 0);

        queue.finish(&msg.id).unwrap();
        queue.finish("never-existed").unwrap();
    }

    #[test]
    fn requeue_unknown_id_returns_none() {
        let queue = unlimited();
        assert!(queue.requeue("missing", false).unwrap().is_none());
    }

    #[test]
    fn requeue_increments_counter_and_goes_to_tail() {
        let queue = unlimited();
        queue.enqueue(&QueueMessage::new(b"retry".to_vec())).unwrap();
        queue.enqueue(&QueueMessage::new(b"other".to_vec())).unwrap();

        let first = queue.take().unwrap().unwrap();
        let requeued = queue.requeue(&first.id, false).unwrap().unwrap();
        assert_eq!(requeued.id, first.id);
        assert_eq!(requeued.num_requeues, 1);
        assert_eq!(requeued.taken_timestamp, 0);

        // "other" is now the head; the requeued message sits at the tail.
        let next = queue.take().unwrap().unwrap();
        assert_eq!(next.payload, b"other");
        let last = queue.take().unwrap().unwrap();
        assert_eq!(last.id, first.id);
        assert_eq!(last.num_requeues, 1);
    }

    #[test]
    fn silent_requeue_preserves_counter_and_queue_timestamp() {
        let clock = FixedClock::new(1_000_000);
        let queue = MemoryQueue::with_clock("silent", 0, false, 0, clock.clone());
        queue.enqueue(&QueueMessage::new(b"x".to_vec())).unwrap();

        let taken = queue.take().unwrap().unwrap();
        clock.advance_millis(500);
        let requeued = queue.requeue(&taken.id, true).unwrap().unwrap();

        assert_eq!(requeued.num_requeues, 0);
        assert_eq!(requeued.queue_timestamp, taken.queue_timestamp);
        assert_eq!(requeued.taken_timestamp, 0);
    }

    #[test]
    fn orphan_scan_applies_threshold_and_limit() {
        let clock = FixedClock::new(10_000_000);
        let queue = MemoryQueue::with_clock("orphans", 0, false, 0, clock.clone());
        for i in 0..5 {
            queue
                .enqueue(&QueueMessage::new(format!("m{i}").into_bytes()))
                .unwrap();
            queue.take().unwrap().unwrap();
        }

        assert!(queue.orphan_messages(10, 0).unwrap().is_empty());

        clock.advance_seconds(30);
        assert_eq!(queue.orphan_messages(10, 0).unwrap().len(), 5);
        assert_eq!(queue.orphan_messages(10, 2).unwrap().len(), 2);
        assert!(queue.orphan_messages(60, 0).unwrap().is_empty());
    }

    #[test]
    fn ephemeral_disabled_flows() {
        let queue = MemoryQueue::new("no-ephemeral", 0, true, 100);
        queue.enqueue(&QueueMessage::new(b"x".to_vec())).unwrap();

        let msg = queue.take().unwrap().unwrap();
        assert_eq!(queue.ephemeral_size().unwrap(), SIZE_NOT_SUPPORTED);
        assert_eq!(queue.ephemeral_capacity(), SIZE_NOT_SUPPORTED);
        assert!(!queue.is_ephemeral_enabled());

        assert!(queue.orphan_messages(0, 0).unwrap().is_empty());
        queue.finish(&msg.id).unwrap();

        let err = queue.requeue(&msg.id, false).unwrap_err();
        assert!(matches!(err, QueueError::OperationNotSupported));
    }

    #[test]
    fn capacities_normalise_to_sentinel() {
        let queue = MemoryQueue::new("caps", -5, false, 0);
        assert_eq!(queue.queue_capacity(), SIZE_NOT_SUPPORTED);
        assert_eq!(queue.ephemeral_capacity(), SIZE_NOT_SUPPORTED);

        let bounded = MemoryQueue::new("caps2", 7, false, 3);
        assert_eq!(bounded.queue_capacity(), 7);
        assert_eq!(bounded.ephemeral_capacity(), 3);
    }

    #[test]
    fn destroy_drops_both_partitions() {
        let queue = unlimited();
        queue.enqueue(&QueueMessage::new(b"x".to_vec())).unwrap();
        queue.take().unwrap().unwrap();

        queue.destroy();
        assert_eq!(queue.queue_size().unwrap(), 0);
        assert_eq!(queue.ephemeral_size().unwrap(), 0);
    }

    #[test]
    fn stored_payload_is_isolated_from_caller() {
        let queue = unlimited();
        let mut msg = QueueMessage::new(vec![1, 2, 3]);
        let stored = queue.enqueue(&msg).unwrap();

        msg.payload[0] = 99;
        let taken = queue.take().unwrap().unwrap();
        assert_eq!(taken.payload, vec![1, 2, 3]);
        assert_eq!(stored.payload, vec![1, 2, 3]);
    }

    proptest! {
        /// Model-based check: ids never appear in both partitions, sizes
        /// track a reference model, and requeue counters never regress.
        #[test]
        fn random_op_sequences_respect_the_contract(ops in proptest::collection::vec(0u8..4, 1..100)) {
            let queue = MemoryQueue::new("prop", 0, false, 0);
            let mut in_queue = 0_usize;
            let mut outstanding: Vec<String> = Vec::new();
            let mut counters: HashMap<String, u32> = HashMap::new();
            let mut next_payload = 0_u32;

            for op in ops {
                match op {
                    0 => {
                        let stored = queue
                            .enqueue(&QueueMessage::new(next_payload.to_be_bytes().to_vec()))
                            .unwrap();
                        prop_assert!(!outstanding.contains(&stored.id));
                        in_queue += 1;
                        next_payload += 1;
                    }
                    1 => {
                        let taken = queue.take().unwrap();
                        if in_queue == 0 {
                            prop_assert!(taken.is_none());
                        } else {
                            let msg = taken.unwrap();
                            prop_assert!(!outstanding.contains(&msg.id));
                            let floor = counters.get(&msg.id).copied().unwrap_or(0);
                            prop_assert!(msg.num_requeues >= floor);
                            counters.insert(msg.id.clone(), msg.num_requeues);
                            outstanding.push(msg.id);
                            in_queue -= 1;
                        }
                    }
                    2 => {
                        if let Some(id) = outstanding.pop() {
                            let requeued = queue.requeue(&id, false).unwrap().unwrap();
                            prop_assert_eq!(&requeued.id, &id);
                            counters.insert(id, requeued.num_requeues);
                            in_queue += 1;
                        } else {
                            prop_assert!(queue.requeue("missing", false).unwrap().is_none());
                        }
                    }
                    _ => {
                        if let Some(id) = outstanding.pop() {
                            queue.finish(&id).unwrap();
                        } else {
                            queue.finish("missing").unwrap();
                        }
                    }
                }

                prop_assert_eq!(queue.queue_size().unwrap(), in_queue as i64);
                prop_assert_eq!(queue.ephemeral_size().unwrap(), outstanding.len() as i64);
            }
        }
    }
}
