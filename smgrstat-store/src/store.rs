//! # Keyed Shared Store
//!
//! Concurrent map from [`Key`] to [`Entry`], partitioned into independently
//! locked shards.
//!
//! ```text
//!   session A ──┐        ┌──────────── StatsStore ────────────┐
//!   session B ──┼──────> │ shard 0 │ shard 1 │ ... │ shard N-1│
//!   session C ──┘        │ RwLock  │ RwLock  │     │ RwLock   │
//!                        └────────────────────────────────────┘
//!                                    ▲
//!   collector ── snapshot(reset) ────┘  shard by shard, copy + reset
//! ```
//!
//! Entries are created lazily and never deleted. A mutation made while an
//! [`EntryGuard`] is held lands either entirely in the current snapshot or
//! entirely in the next one.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;

use smgrstat_core::{Key, Metrics};

use crate::entry::Entry;

/// Default number of lock partitions
pub const DEFAULT_SHARDS: usize = 64;

/// Exclusive access to one entry; the partition lock is released on drop
pub struct EntryGuard<'a> {
    inner: RefMut<'a, Key, Entry>,
}

impl<'a> EntryGuard<'a> {
    pub fn key(&self) -> &Key {
        self.inner.key()
    }
}

impl<'a> Deref for EntryGuard<'a> {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        self.inner.value()
    }
}

impl<'a> DerefMut for EntryGuard<'a> {
    fn deref_mut(&mut self) -> &mut Entry {
        self.inner.value_mut()
    }
}

/// Copies of every active entry plus the period they belong to
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bucket_id: u64,
    pub entries: Vec<Entry>,
}

/// Upper bound on store shards
pub const MAX_SHARDS: usize = 1 << 16;

/// Shared per-key statistics store
pub struct StatsStore {
    map: DashMap<Key, Entry>,
    /// Id of the collection period in progress, starts at 1
    bucket_id: AtomicU64,
    metrics: Metrics,
}

impl StatsStore {
    pub fn new(metrics: Metrics) -> Self {
        Self::with_shards(DEFAULT_SHARDS, metrics)
    }

    /// Shard count is rounded up to a power of two in `2..=MAX_SHARDS`
    pub fn with_shards(shards: usize, metrics: Metrics) -> Self {
        let shards = shards.clamp(2, MAX_SHARDS).next_power_of_two();
        Self {
            map: DashMap::with_shard_amount(shards),
            bucket_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Lock the entry for `key`, creating a zeroed one if absent
    ///
    /// The flag is `true` when the entry already existed.
    pub fn get_or_create(&self, key: Key) -> (EntryGuard<'_>, bool) {
        match self.map.entry(key) {
            MapEntry::Occupied(occupied) => (
                EntryGuard {
                    inner: occupied.into_ref(),
                },
                true,
            ),
            MapEntry::Vacant(vacant) => {
                self.metrics.record_entry_created();
                (
                    EntryGuard {
                        inner: vacant.insert(Entry::new(key)),
                    },
                    false,
                )
            }
        }
    }

    /// Lock an existing entry; never allocates
    pub fn find(&self, key: &Key) -> Option<EntryGuard<'_>> {
        self.map.get_mut(key).map(|inner| EntryGuard { inner })
    }

    /// Give up the partition lock
    pub fn release(&self, guard: EntryGuard<'_>) {
        drop(guard);
    }

    /// Copy every active entry
    ///
    /// With `reset` the period counter advances and each copied entry is
    /// reset in place under its partition lock, so the returned bucket id is
    /// the id of the period that just closed.
    pub fn snapshot(&self, reset: bool) -> Snapshot {
        if !reset {
            let bucket_id = self.bucket_id.load(Ordering::Acquire);
            let entries = self
                .map
                .iter()
                .filter(|item| item.value().is_active())
                .map(|item| item.value().clone())
                .collect();
            return Snapshot { bucket_id, entries };
        }

        let bucket_id = self.bucket_id.fetch_add(1, Ordering::AcqRel);
        let mut entries = Vec::new();
        for mut item in self.map.iter_mut() {
            let entry = item.value_mut();
            if entry.is_active() {
                entries.push(entry.clone());
                entry.reset_period();
            }
        }
        Snapshot { bucket_id, entries }
    }

    /// Id of the period currently accumulating
    pub fn current_bucket(&self) -> u64 {
        self.bucket_id.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
