//! Sharded counters for hot-path metrics.
//!
//! Proxy workers bump counters on every frame and every backend reply; a
//! single atomic would bounce its cache line between workers. A
//! [`CounterGroup`] stripes up to 16 counters across per-thread shards so
//! each worker writes only its own cache lines, and [`Counter`] exposes
//! one slot of a group as a `metriken`-registered metric whose value is
//! the sum over all shards.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

const CACHE_LINE: usize = 128;
/// Counters per group: one cache line of 8-byte slots.
const SLOTS: usize = CACHE_LINE / 8;
const NUM_SHARDS: usize = 64;

thread_local! {
    /// This thread's shard, chosen on first use or pinned explicitly via
    /// [`set_thread_shard`].
    static SHARD_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Pin the calling thread to a shard.
///
/// Call at proxy-thread startup with the worker index so shard
/// assignment is deterministic and workers never share a shard (up to 64
/// workers). Threads that never call this fall back to a hash of their
/// thread id.
pub fn set_thread_shard(id: usize) {
    SHARD_ID.set(Some(id % NUM_SHARDS));
}

#[inline]
fn shard_index() -> usize {
    match SHARD_ID.get() {
        Some(id) => id,
        None => {
            let mut hasher = DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            let id = hasher.finish() as usize % NUM_SHARDS;
            SHARD_ID.set(Some(id));
            id
        }
    }
}

#[repr(align(128))]
struct Shard {
    slots: [AtomicU64; SLOTS],
}

/// Sharded storage for up to 16 counters.
///
/// Counters in the same group share shard storage, so a whole group costs
/// one cache line per writing thread regardless of how many of its slots
/// are in use.
pub struct CounterGroup {
    shards: [Shard; NUM_SHARDS],
}

impl CounterGroup {
    /// Create a group with all slots at zero.
    pub const fn new() -> Self {
        Self {
            shards: [const {
                Shard {
                    slots: [const { AtomicU64::new(0) }; SLOTS],
                }
            }; NUM_SHARDS],
        }
    }

    #[inline]
    fn add(&self, slot: usize, value: u64) {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        self.shards[shard_index()].slots[slot].fetch_add(value, Ordering::Relaxed);
    }

    fn sum(&self, slot: usize) -> u64 {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        self.shards
            .iter()
            .map(|shard| shard.slots[slot].load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for CounterGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// One slot of a [`CounterGroup`], registrable with metriken.
pub struct Counter {
    group: &'static CounterGroup,
    slot: usize,
}

impl Counter {
    /// Create a counter backed by `slot` of `group`.
    ///
    /// Debug builds panic on writes if `slot >= 16`.
    pub const fn new(group: &'static CounterGroup, slot: usize) -> Self {
        Self { group, slot }
    }

    /// Increment the counter by 1.
    #[inline]
    pub fn increment(&self) {
        self.group.add(self.slot, 1);
    }

    /// Add a value to the counter.
    #[inline]
    pub fn add(&self, value: u64) {
        self.group.add(self.slot, value);
    }

    /// Current value, aggregated across all shards.
    pub fn value(&self) -> u64 {
        self.group.sum(self.slot)
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}
