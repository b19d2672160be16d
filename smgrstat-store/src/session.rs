//! # Session
//!
//! Per-connection interception layer between the storage manager and the
//! shared store. Every storage call is forwarded to the real implementation
//! and then folded into the entry for its key.
//!
//! ## Operation Flow
//!
//! ```text
//!  storage call ──> real I/O (timed) ──> tracking key ──> classifier
//!                                          │ (temp mode)     (real key)
//!                                          ▼
//!                                  get_or_create(key) ──> update ──> release
//!                                          │ new entry?
//!                                          ▼
//!                                  pending metadata ──> resolved at safe points
//! ```
//!
//! Recording never fails and never touches the catalog. Catalog work only
//! happens in [`Session::resolve_pending_metadata`], [`Session::database_created`]
//! and when the session closes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use smgrstat_core::{BlockNumber, Direction, Fork, Key, Oid, SharedConfig, StorageLocation, TempTracking};

use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::context::{MayBlock, NoBlock};
use crate::metadata::{self, PendingMetadata, ResolveStats};
use crate::region::SharedRegion;
use crate::sequential::{AccessTracker, SeqResult};

/// Relation as seen by the storage manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub location: StorageLocation,
    /// Session-private temporary relation
    pub temp: bool,
}

impl Relation {
    pub fn new(location: StorageLocation) -> Self {
        Self { location, temp: false }
    }

    pub fn temporary(location: StorageLocation) -> Self {
        Self { location, temp: true }
    }

    fn real_key(&self, fork: Fork) -> Key {
        Key::new(self.location, fork)
    }
}

#[inline]
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// I/O-issuing actor bound to one database connection
pub struct Session {
    region: Arc<SharedRegion>,
    catalog: Arc<dyn Catalog>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    access: AccessTracker,
    pending: PendingMetadata,
    closed: bool,
}

impl Session {
    pub fn new(
        region: Arc<SharedRegion>,
        catalog: Arc<dyn Catalog>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let database = catalog.database();
        Self {
            region,
            catalog,
            config,
            clock,
            access: AccessTracker::new(),
            pending: PendingMetadata::new(database),
            closed: false,
        }
    }

    /// Database this session is connected to
    pub fn database(&self) -> Oid {
        self.catalog.database()
    }

    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    /// Keys waiting for metadata resolution
    pub fn pending_metadata(&self) -> usize {
        self.pending.len()
    }

    /// Key the statistics are recorded under, `None` when untracked
    fn tracking_key(&self, rel: &Relation, fork: Fork) -> Option<Key> {
        if !rel.temp {
            return Some(rel.real_key(fork));
        }
        match self.config.temp_tracking() {
            TempTracking::Off => None,
            TempTracking::Individual => Some(rel.real_key(fork)),
            TempTracking::Aggregate => Some(Key::temp_aggregate(rel.location.database)),
        }
    }

    /// Register a key the store just created
    fn note_created(&mut self, key: Key, found: bool) {
        if !found {
            self.pending.add(key);
        }
    }

    /// Bookkeeping after an operation was counted into an entry
    fn note_recorded(&mut self, key: Key, found: bool) {
        self.note_created(key, found);
        self.region.metrics().record_operation();
    }

    /// Make sure an entry exists, without recording activity
    fn ensure_entry(&mut self, key: Key) {
        let (entry, found) = self.region.store().get_or_create(key);
        drop(entry);
        self.note_created(key, found);
    }

    /// Synchronous read wrapper: runs `io`, times it and records it
    pub fn read<T>(
        &mut self,
        rel: &Relation,
        fork: Fork,
        blocknum: BlockNumber,
        nblocks: u32,
        io: impl FnOnce() -> T,
    ) -> T {
        let started = Instant::now();
        let result = io();
        self.record_read(rel, fork, blocknum, nblocks, started.elapsed());
        result
    }

    /// Record a completed synchronous read
    pub fn record_read(&mut self, rel: &Relation, fork: Fork, blocknum: BlockNumber, nblocks: u32, elapsed: Duration) {
        let Some(key) = self.tracking_key(rel, fork) else {
            return;
        };
        let pattern = self.access.check(rel.real_key(fork), blocknum, nblocks, Direction::Read);
        let now = self.clock.now_us();

        let (mut entry, found) = self.region.store().get_or_create(key);
        entry.record_read(nblocks, pattern, micros(elapsed), now);
        drop(entry);
        self.note_recorded(key, found);
    }

    /// Begin an asynchronous read
    ///
    /// The entry is created here, where blocking is allowed, so that the
    /// completion only needs a lookup. Returns `None` when untracked.
    pub fn start_read(&mut self, rel: &Relation, fork: Fork, blocknum: BlockNumber, nblocks: u32) -> Option<PendingRead> {
        let key = self.tracking_key(rel, fork)?;
        self.ensure_entry(key);
        let pattern = self.access.check(rel.real_key(fork), blocknum, nblocks, Direction::Read);
        Some(PendingRead {
            region: Arc::clone(&self.region),
            clock: Arc::clone(&self.clock),
            key,
            nblocks,
            pattern,
            started: Instant::now(),
        })
    }

    /// Synchronous write wrapper: runs `io`, times it and records it
    pub fn write<T>(
        &mut self,
        rel: &Relation,
        fork: Fork,
        blocknum: BlockNumber,
        nblocks: u32,
        io: impl FnOnce() -> T,
    ) -> T {
        let started = Instant::now();
        let result = io();
        self.record_write(rel, fork, blocknum, nblocks, started.elapsed());
        result
    }

    /// Record a completed write
    pub fn record_write(&mut self, rel: &Relation, fork: Fork, blocknum: BlockNumber, nblocks: u32, elapsed: Duration) {
        let Some(key) = self.tracking_key(rel, fork) else {
            return;
        };
        let pattern = self.access.check(rel.real_key(fork), blocknum, nblocks, Direction::Write);
        let now = self.clock.now_us();

        let (mut entry, found) = self.region.store().get_or_create(key);
        entry.record_write(nblocks, pattern, micros(elapsed), now);
        drop(entry);
        self.note_recorded(key, found);
    }

    /// One block appended at `blocknum`
    pub fn extend(&mut self, rel: &Relation, fork: Fork, _blocknum: BlockNumber) {
        self.record_extend(rel, fork, 1);
    }

    /// `nblocks` zero-filled blocks appended at `blocknum`
    pub fn zero_extend(&mut self, rel: &Relation, fork: Fork, _blocknum: BlockNumber, nblocks: u32) {
        self.record_extend(rel, fork, nblocks);
    }

    fn record_extend(&mut self, rel: &Relation, fork: Fork, nblocks: u32) {
        let Some(key) = self.tracking_key(rel, fork) else {
            return;
        };
        let now = self.clock.now_us();
        let (mut entry, found) = self.region.store().get_or_create(key);
        entry.record_extend(nblocks, now);
        drop(entry);
        self.note_recorded(key, found);
    }

    pub fn truncate(&mut self, rel: &Relation, fork: Fork, _old_nblocks: BlockNumber, _nblocks: BlockNumber) {
        let Some(key) = self.tracking_key(rel, fork) else {
            return;
        };
        let now = self.clock.now_us();
        let (mut entry, found) = self.region.store().get_or_create(key);
        entry.record_truncate(now);
        drop(entry);
        self.note_recorded(key, found);
    }

    /// Forced flush of a fork to stable storage
    pub fn sync(&mut self, rel: &Relation, fork: Fork) {
        let Some(key) = self.tracking_key(rel, fork) else {
            return;
        };
        let now = self.clock.now_us();
        let (mut entry, found) = self.region.store().get_or_create(key);
        entry.record_sync(now);
        drop(entry);
        self.note_recorded(key, found);
    }

    /// Relation opened: make sure its main fork has an entry
    pub fn open(&mut self, rel: &Relation) {
        if let Some(key) = self.tracking_key(rel, Fork::Main) {
            self.ensure_entry(key);
        }
    }

    /// Fork created, possibly replacing the files at `previous`
    ///
    /// A non-temporary relation whose file number changed gets a lineage
    /// event; its identity is resolved later by the collector.
    pub fn create(&mut self, rel: &Relation, fork: Fork, previous: Option<StorageLocation>, is_replay: bool) {
        if let Some(old) = previous {
            if !rel.temp && old.file_number != 0 && old.file_number != rel.location.file_number {
                self.region.lineage().enqueue(old, rel.location, fork, is_replay);
            }
        }
        if let Some(key) = self.tracking_key(rel, fork) {
            self.ensure_entry(key);
        }
    }

    /// Safe point: resolve metadata for every key this session created
    ///
    /// Call at the end of each query and utility statement.
    pub fn resolve_pending_metadata(&mut self) -> ResolveStats {
        if self.pending.is_empty() {
            return ResolveStats::default();
        }
        let cx = MayBlock::assert_safe_point();
        self.pending.resolve(self.region.store(), self.catalog.as_ref(), &cx)
    }

    /// Safe point after a database was created from a template
    pub fn database_created(&mut self, database: Oid, default_tablespace: Oid) -> usize {
        let cx = MayBlock::assert_safe_point();
        let applied = metadata::resolve_database(
            self.region.store(),
            self.catalog.as_ref(),
            database,
            default_tablespace,
            &cx,
        );
        self.resolve_pending_metadata();
        applied
    }

    /// Push in-progress sequential runs into the shared entries
    pub fn flush_local_runs(&mut self) -> usize {
        self.access.flush_runs(self.region.store())
    }

    /// End the session: flush runs and resolve what is still pending
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let runs = self.flush_local_runs();
        let stats = self.resolve_pending_metadata();
        debug!(
            database = self.database(),
            runs_flushed = runs,
            metadata_applied = stats.applied,
            "Session closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An asynchronous read in flight
///
/// Completing it only looks the entry up; it never allocates and never
/// touches the catalog, so it is safe from completion callbacks. A failed
/// read is simply dropped.
#[must_use = "an unfinished read records nothing"]
pub struct PendingRead {
    region: Arc<SharedRegion>,
    clock: Arc<dyn Clock>,
    key: Key,
    nblocks: u32,
    pattern: SeqResult,
    started: Instant,
}

impl PendingRead {
    pub fn key(&self) -> Key {
        self.key
    }

    /// Record the read; returns `false` if the entry has disappeared
    pub fn complete(self, _cx: &NoBlock) -> bool {
        let latency_us = micros(self.started.elapsed());
        let now = self.clock.now_us();
        match self.region.store().find(&self.key) {
            Some(mut entry) => {
                entry.record_read(self.nblocks, self.pattern, latency_us, now);
                drop(entry);
                self.region.metrics().record_operation();
                true
            }
            None => false,
        }
    }
}
