//! Durable [`MessageQueue`] backend on top of redb.
//!
//! Each queue instance owns one redb database under
//! `<data_path>/<name>/`, holding three tables:
//!
//! - `queue`     -- id -> MessagePack record, the queue partition
//! - `ephemeral` -- id -> MessagePack record, the ephemeral partition
//! - `meta`      -- the persisted take-cursor (`last_taken_id`)
//!
//! Message ids are minted on every enqueue and are lexicographically
//! monotonic, so iterating the `queue` table in key order yields FIFO
//! order. Every mutation is a single write transaction; redb serialises
//! writers, which makes the capacity check atomic with the insert and a
//! take an all-or-nothing partition move.
//!
//! Concurrency needs two locks only: an *init* lock around lazy open and
//! a *take* lock that owns the scan cursor. Enqueue, finish, requeue and
//! the orphan scan rely on redb's own transaction serialisation.

use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use conveyor_core::{
    unique_id, ClockSource, MessageQueue, QueueError, QueueMessage, SystemClock,
    SIZE_NOT_SUPPORTED,
};

const QUEUE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("queue");
const EPHEMERAL_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ephemeral");
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

/// Key in `META_TABLE` holding the id of the most recently taken message.
const LAST_TAKEN_KEY: &str = "last_taken_id";

const DB_FILE: &str = "queue.redb";

fn encode(msg: &QueueMessage) -> Result<Vec<u8>, QueueError> {
    rmp_serde::to_vec_named(msg).map_err(QueueError::codec)
}

fn decode(bytes: &[u8]) -> Result<QueueMessage, QueueError> {
    rmp_serde::from_slice(bytes).map_err(QueueError::codec)
}

/// See `at_capacity` in the in-memory backend; here occupancy comes from
/// redb's maintained table length.
fn at_capacity(len: u64, capacity: i64) -> bool {
    // Callers only pass positive capacities; the sentinel never reaches the cast.
    #[allow(clippy::cast_sign_loss)]
    let capacity = capacity as u64;
    len >= capacity
}

#[allow(clippy::cast_possible_wrap)]
fn len_as_i64(len: u64) -> i64 {
    len as i64
}

/// Returns the first queue entry strictly after `cursor`, rewinding to
/// the lowest key when the cursor points past the end of the keyspace.
///
/// The bound is exclusive: a re-queued message keeps its id, and when
/// that id equals the cursor an inclusive scan would hand it straight
/// back, jumping it ahead of the backlog. The rewind picks up re-queued
/// messages (which sort at or below the cursor) and recovers from a
/// stale persisted cursor after a crash.
fn next_entry<T>(table: &T, cursor: &str) -> Result<Option<(String, Vec<u8>)>, QueueError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut range = table
        .range::<&str>((Bound::Excluded(cursor), Bound::Unbounded))
        .map_err(QueueError::storage)?;
    if let Some(entry) = range.next() {
        let (key, value) = entry.map_err(QueueError::storage)?;
        return Ok(Some((key.value().to_string(), value.value().to_vec())));
    }
    drop(range);

    let mut all = table.iter().map_err(QueueError::storage)?;
    match all.next() {
        Some(entry) => {
            let (key, value) = entry.map_err(QueueError::storage)?;
            Ok(Some((key.value().to_string(), value.value().to_vec())))
        }
        None => Ok(None),
    }
}

/// Durable queue backend.
///
/// Ids are always minted on enqueue (caller-provided ids are discarded);
/// requeued messages keep their id. The take cursor survives restarts via
/// the `meta` table, and a stale cursor degrades to a harmless rescan
/// from the lowest key.
pub struct DurableQueue {
    name: String,
    data_path: PathBuf,
    queue_capacity: i64,
    ephemeral_capacity: i64,
    ephemeral_disabled: bool,
    clock: Arc<dyn ClockSource>,
    /// Init lock. `None` until first use and after `destroy()`.
    db: Mutex<Option<Arc<Database>>>,
    /// Take lock; also owns the in-memory scan cursor.
    cursor: Mutex<String>,
}

impl DurableQueue {
    /// Creates a durable queue storing data under `<data_path>/<name>/`.
    /// Capacities that are zero or negative mean unlimited. The database
    /// is opened lazily on first use; call [`init`](DurableQueue::init)
    /// to surface open errors eagerly.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        data_path: impl Into<PathBuf>,
        queue_capacity: i64,
        ephemeral_disabled: bool,
        ephemeral_capacity: i64,
    ) -> Self {
        Self::with_clock(
            name,
            data_path,
            queue_capacity,
            ephemeral_disabled,
            ephemeral_capacity,
            Arc::new(SystemClock),
        )
    }

    /// Creates a durable queue stamping timestamps from `clock`.
    #[must_use]
    pub fn with_clock(
        name: impl Into<String>,
        data_path: impl Into<PathBuf>,
        queue_capacity: i64,
        ephemeral_disabled: bool,
        ephemeral_capacity: i64,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let normalize = |capacity: i64| {
            if capacity <= 0 {
                SIZE_NOT_SUPPORTED
            } else {
                capacity
            }
        };
        Self {
            name: name.into(),
            data_path: data_path.into(),
            queue_capacity: normalize(queue_capacity),
            ephemeral_capacity: if ephemeral_disabled {
                SIZE_NOT_SUPPORTED
            } else {
                normalize(ephemeral_capacity)
            },
            ephemeral_disabled,
            clock,
            db: Mutex::new(None),
            cursor: Mutex::new(String::new()),
        }
    }

    /// Opens the database now instead of on the first operation.
    pub fn init(&self) -> Result<(), QueueError> {
        self.ensure_init().map(|_| ())
    }

    /// Opens the database if needed, creating tables and seeding the take
    /// cursor persisted by a previous session.
    fn ensure_init(&self) -> Result<Arc<Database>, QueueError> {
        let mut slot = self.db.lock();
        if let Some(db) = slot.as_ref() {
            return Ok(db.clone());
        }

        let dir = self.data_path.join(&self.name);
        std::fs::create_dir_all(&dir).map_err(QueueError::storage)?;
        let db = Database::create(dir.join(DB_FILE)).map_err(QueueError::storage)?;

        // Create tables up front so read transactions always find them.
        let txn = db.begin_write().map_err(QueueError::storage)?;
        let seeded_cursor = {
            txn.open_table(QUEUE_TABLE).map_err(QueueError::storage)?;
            txn.open_table(EPHEMERAL_TABLE)
                .map_err(QueueError::storage)?;
            let meta = txn.open_table(META_TABLE).map_err(QueueError::storage)?;
            let value = meta
                .get(LAST_TAKEN_KEY)
                .map_err(QueueError::storage)?
                .map(|guard| guard.value().to_string());
            value
        };
        txn.commit().map_err(QueueError::storage)?;

        *self.cursor.lock() = seeded_cursor.unwrap_or_default();

        tracing::debug!(
            queue = %self.name,
            path = %dir.display(),
            "opened durable queue storage"
        );

        let db = Arc::new(db);
        *slot = Some(db.clone());
        Ok(db)
    }
}

impl MessageQueue for DurableQueue {
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
        let db = self.ensure_init()?;

        // Minted ids encode FIFO order in the key space; caller-provided
        // ids are discarded on this backend.
        let mut stored = msg.clone();
        stored.id = unique_id();
        stored.queue_timestamp = self.clock.now_millis();
        stored.taken_timestamp = 0;
        stored.num_requeues = 0;
        let encoded = encode(&stored)?;

        let txn = db.begin_write().map_err(QueueError::storage)?;
        {
            let mut queue = txn.open_table(QUEUE_TABLE).map_err(QueueError::storage)?;
            if self.queue_capacity > 0 {
                let len = queue.len().map_err(QueueError::storage)?;
                if at_capacity(len, self.queue_capacity) {
                    return Err(QueueError::QueueFull);
                }
            }
            queue
                .insert(stored.id.as_str(), encoded.as_slice())
                .map_err(QueueError::storage)?;
        }
        txn.commit().map_err(QueueError::storage)?;
        Ok(stored)
    }

    fn take(&self) -> Result<Option<QueueMessage>, QueueError> {
        let db = self.ensure_init()?;
        let mut cursor = self.cursor.lock();

        let txn = db.begin_write().map_err(QueueError::storage)?;
        let taken = {
            let mut queue = txn.open_table(QUEUE_TABLE).map_err(QueueError::storage)?;
            let mut ephemeral = txn
                .open_table(EPHEMERAL_TABLE)
                .map_err(QueueError::storage)?;
            let mut meta = txn.open_table(META_TABLE).map_err(QueueError::storage)?;

            if !self.ephemeral_disabled && self.ephemeral_capacity > 0 {
                let len = ephemeral.len().map_err(QueueError::storage)?;
                if at_capacity(len, self.ephemeral_capacity) {
                    // Transaction dropped without commit: the head is untouched.
                    return Err(QueueError::EphemeralFull);
                }
            }

            match next_entry(&queue, cursor.as_str())? {
                None => None,
                Some((id, bytes)) => {
                    let mut msg = decode(&bytes)?;
                    msg.taken_timestamp = self.clock.now_millis();

                    queue.remove(id.as_str()).map_err(QueueError::storage)?;
                    if !self.ephemeral_disabled {
                        let encoded = encode(&msg)?;
                        ephemeral
                            .insert(id.as_str(), encoded.as_slice())
                            .map_err(QueueError::storage)?;
                    }
                    meta.insert(LAST_TAKEN_KEY, id.as_str())
                        .map_err(QueueError::storage)?;
                    Some((id, msg))
                }
            }
        };

        match taken {
            None => Ok(None),
            Some((id, msg)) => {
                txn.commit().map_err(QueueError::storage)?;
                *cursor = id;
                Ok(Some(msg))
            }
        }
    }

    fn finish(&self, id: &str) -> Result<(), QueueError> {
        if self.ephemeral_disabled {
            return Ok(());
        }
        let db = self.ensure_init()?;

        let txn = db.begin_write().map_err(QueueError::storage)?;
        {
            let mut ephemeral = txn
                .open_table(EPHEMERAL_TABLE)
                .map_err(QueueError::storage)?;
            ephemeral.remove(id).map_err(QueueError::storage)?;
        }
        txn.commit().map_err(QueueError::storage)?;
        Ok(())
    }

    fn requeue(&self, id: &str, silent: bool) -> Result<Option<QueueMessage>, QueueError> {
        if self.ephemeral_disabled {
            return Err(QueueError::OperationNotSupported);
        }
        let db = self.ensure_init()?;

        let txn = db.begin_write().map_err(QueueError::storage)?;
        let requeued = {
            let mut queue = txn.open_table(QUEUE_TABLE).map_err(QueueError::storage)?;
            let mut ephemeral = txn
                .open_table(EPHEMERAL_TABLE)
                .map_err(QueueError::storage)?;

            let removed_entry = ephemeral.remove(id).map_err(QueueError::storage)?;
            match removed_entry {
                None => None,
                Some(removed) => {
                    let mut msg = decode(removed.value())?;
                    drop(removed);

                    msg.taken_timestamp = 0;
                    if !silent {
                        msg.queue_timestamp = self.clock.now_millis();
                        msg.num_requeues += 1;
                    }
                    let encoded = encode(&msg)?;
                    // The id is preserved. The key sorts at or below the
                    // take cursor and becomes visible once the cursor
                    // rewinds, i.e. after every message currently ahead
                    // of it.
                    queue
                        .insert(msg.id.as_str(), encoded.as_slice())
                        .map_err(QueueError::storage)?;
                    Some(msg)
                }
            }
        };

        match requeued {
            None => Ok(None),
            Some(msg) => {
                txn.commit().map_err(QueueError::storage)?;
                Ok(Some(msg))
            }
        }
    }

    fn orphan_messages(
        &self,
        num_seconds: u64,
        num_messages: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        if self.ephemeral_disabled {
            return Ok(Vec::new());
        }
        let db = self.ensure_init()?;

        let txn = db.begin_read().map_err(QueueError::storage)?;
        let ephemeral = txn
            .open_table(EPHEMERAL_TABLE)
            .map_err(QueueError::storage)?;

        let now_seconds = self.clock.now_millis() / 1000;
        let mut result = Vec::new();
        for entry in ephemeral.iter().map_err(QueueError::storage)? {
            let (key, value) = entry.map_err(QueueError::storage)?;
            let msg = match decode(value.value()) {
                Ok(msg) => msg,
                Err(err) => {
                    // Best-effort read: skip records that no longer decode
                    // instead of failing the whole scan.
                    tracing::warn!(
                        queue = %self.name,
                        id = key.value(),
                        %err,
                        "skipping undecodable ephemeral record"
                    );
                    continue;
                }
            };
            if msg.taken_timestamp / 1000 + num_seconds < now_seconds {
                result.push(msg);
                if num_messages > 0 && result.len() >= num_messages {
                    break;
                }
            }
        }
        Ok(result)
    }

    fn queue_size(&self) -> Result<i64, QueueError> {
        let db = self.ensure_init()?;
        let txn = db.begin_read().map_err(QueueError::storage)?;
        let queue = txn.open_table(QUEUE_TABLE).map_err(QueueError::storage)?;
        let len = queue.len().map_err(QueueError::storage)?;
        Ok(len_as_i64(len))
    }

    fn ephemeral_size(&self) -> Result<i64, QueueError> {
        if self.ephemeral_disabled {
            return Ok(SIZE_NOT_SUPPORTED);
        }
        let db = self.ensure_init()?;
        let txn = db.begin_read().map_err(QueueError::storage)?;
        let ephemeral = txn
            .open_table(EPHEMERAL_TABLE)
            .map_err(QueueError::storage)?;
        let len = ephemeral.len().map_err(QueueError::storage)?;
        Ok(len_as_i64(len))
    }

    fn destroy(&self) {
        let closed = self.db.lock().take().is_some();
        if closed {
            tracing::debug!(queue = %self.name, "closed durable queue storage");
        }
    }
}
