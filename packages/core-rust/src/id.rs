//! Process-wide unique message-id generation.
//!
//! Ids are 128-bit values rendered as 32 lowercased hex characters:
//! 48 bits of wall-clock milliseconds, a 32-bit logical counter, and a
//! 48-bit per-process node tag. Fixed-width big-endian hex means
//! lexicographic id order equals generation order, which the durable
//! backend relies on for FIFO key iteration.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;

use crate::clock::{ClockSource, SystemClock};

const MILLIS_MASK: u64 = 0xFFFF_FFFF_FFFF;
const NODE_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Monotonic id source.
///
/// The millis/counter pair follows the hybrid-logical-clock recipe: when
/// the wall clock advances the counter resets to 0; when it stalls or runs
/// backwards the counter increments. Consecutive ids therefore never
/// collide and never sort backwards, even across clock regressions.
///
/// The node tag is drawn at random per generator. Any globally-unique
/// source would do; 48 random bits make cross-process collisions within
/// the same millisecond vanishingly unlikely.
pub struct IdGenerator {
    state: Mutex<GeneratorState>,
    node: u64,
    clock: Box<dyn ClockSource>,
}

struct GeneratorState {
    last_millis: u64,
    counter: u32,
}

impl IdGenerator {
    /// Creates a generator with a random node tag and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    /// Creates a generator reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Box<dyn ClockSource>) -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                counter: 0,
            }),
            node: rand::rng().random::<u64>() & NODE_MASK,
            clock,
        }
    }

    /// Returns the next id: 32 lowercased hex characters, strictly greater
    /// than every id this generator has returned before.
    pub fn next_id(&self) -> String {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        if now > state.last_millis {
            // Wall clock advanced: reset the counter.
            state.last_millis = now;
            state.counter = 0;
        } else {
            // Wall clock stalled or ran backwards: increment the counter.
            state.counter += 1;
        }

        let millis = state.last_millis & MILLIS_MASK;
        let counter = state.counter;
        drop(state);

        format!("{millis:012x}{counter:08x}{node:012x}", node = self.node)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_GENERATOR: Lazy<IdGenerator> = Lazy::new(IdGenerator::new);

/// Returns a fresh id from the process-wide generator.
///
/// Thread-safe; every call in a process yields a distinct, monotonically
/// increasing id.
#[must_use]
pub fn unique_id() -> String {
    GLOBAL_GENERATOR.next_id()
}
