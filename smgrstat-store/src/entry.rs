//! # Store Entry
//!
//! The per-key aggregate kept in the shared store.
//!
//! ```text
//! ┌──────────────────────────── Entry ────────────────────────────┐
//! │ identity   key, meta (relid, parent, kind, name, namespace)   │
//! │ counters   reads/blocks writes/blocks extends/blocks          │
//! │            truncates syncs                                     │
//! │ timing     read histogram        write histogram              │
//! │ bursts     read IAT (Welford)    write IAT (Welford)          │
//! │ pattern    seq/random counts     run-length Welfords          │
//! │ activity   active_seconds  first_access  last_access          │
//! ├────────────────────────────────────────────────────────────────┤
//! │ carried across resets: last op time per direction,             │
//! │                        last active second                      │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use smgrstat_core::{Direction, EntryMeta, Key, OnlineStats, TimestampUs, TimingHistogram};

use crate::sequential::SeqResult;

/// Inter-arrival time accumulator for one direction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Burstiness {
    /// Inter-arrival times in microseconds
    pub iat: OnlineStats,
    /// Survives period resets so the first IAT of a period is still measured
    pub last_op_time: TimestampUs,
}

impl Burstiness {
    #[inline]
    pub fn record(&mut self, now: TimestampUs) {
        if self.last_op_time != 0 {
            self.iat.record(now.saturating_sub(self.last_op_time).max(0) as f64);
        }
        self.last_op_time = now;
    }
}

/// Aggregated statistics for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub meta: EntryMeta,

    pub reads: u64,
    pub read_blocks: u64,
    pub writes: u64,
    pub write_blocks: u64,
    pub extends: u64,
    pub extend_blocks: u64,
    pub truncates: u64,
    pub syncs: u64,

    pub read_timing: TimingHistogram,
    pub write_timing: TimingHistogram,

    pub read_burst: Burstiness,
    pub write_burst: Burstiness,

    pub sequential_reads: u64,
    pub random_reads: u64,
    pub sequential_writes: u64,
    pub random_writes: u64,
    pub read_runs: OnlineStats,
    pub write_runs: OnlineStats,

    pub active_seconds: u64,
    pub first_access: TimestampUs,
    pub last_access: TimestampUs,
    last_active_second: i64,
}

impl Entry {
    /// Zero-initialized entry; the temp aggregate is born with its identity
    pub fn new(key: Key) -> Self {
        let meta = if key.is_temp_aggregate() {
            EntryMeta::temp_aggregate()
        } else {
            EntryMeta::default()
        };
        Self {
            key,
            meta,
            reads: 0,
            read_blocks: 0,
            writes: 0,
            write_blocks: 0,
            extends: 0,
            extend_blocks: 0,
            truncates: 0,
            syncs: 0,
            read_timing: TimingHistogram::new(),
            write_timing: TimingHistogram::new(),
            read_burst: Burstiness::default(),
            write_burst: Burstiness::default(),
            sequential_reads: 0,
            random_reads: 0,
            sequential_writes: 0,
            random_writes: 0,
            read_runs: OnlineStats::new(),
            write_runs: OnlineStats::new(),
            active_seconds: 0,
            first_access: 0,
            last_access: 0,
            last_active_second: 0,
        }
    }

    /// Activity this period; idle entries are skipped by snapshots
    #[inline]
    pub fn is_active(&self) -> bool {
        self.first_access != 0
    }

    /// Start a new collection period in place
    ///
    /// Metadata, last-operation times and the last active second carry over.
    pub fn reset_period(&mut self) {
        self.reads = 0;
        self.read_blocks = 0;
        self.writes = 0;
        self.write_blocks = 0;
        self.extends = 0;
        self.extend_blocks = 0;
        self.truncates = 0;
        self.syncs = 0;
        self.read_timing.reset();
        self.write_timing.reset();
        self.read_burst.iat.reset();
        self.write_burst.iat.reset();
        self.sequential_reads = 0;
        self.random_reads = 0;
        self.sequential_writes = 0;
        self.random_writes = 0;
        self.read_runs.reset();
        self.write_runs.reset();
        self.active_seconds = 0;
        self.first_access = 0;
        self.last_access = 0;
    }

    /// Stamp activity: first/last access and distinct active seconds
    #[inline]
    pub fn touch(&mut self, now: TimestampUs) {
        if self.first_access == 0 {
            self.first_access = now;
        }
        self.last_access = now;

        let second = now.div_euclid(1_000_000);
        if second != self.last_active_second {
            self.active_seconds += 1;
            self.last_active_second = second;
        }
    }

    pub fn record_read(&mut self, nblocks: u32, pattern: SeqResult, latency_us: u64, now: TimestampUs) {
        self.reads += 1;
        self.read_blocks += u64::from(nblocks);
        self.record_pattern(Direction::Read, pattern);
        self.read_timing.record(latency_us);
        self.read_burst.record(now);
        self.touch(now);
    }

    pub fn record_write(&mut self, nblocks: u32, pattern: SeqResult, latency_us: u64, now: TimestampUs) {
        self.writes += 1;
        self.write_blocks += u64::from(nblocks);
        self.record_pattern(Direction::Write, pattern);
        self.write_timing.record(latency_us);
        self.write_burst.record(now);
        self.touch(now);
    }

    pub fn record_extend(&mut self, nblocks: u32, now: TimestampUs) {
        self.extends += 1;
        self.extend_blocks += u64::from(nblocks);
        self.touch(now);
    }

    pub fn record_truncate(&mut self, now: TimestampUs) {
        self.truncates += 1;
        self.touch(now);
    }

    pub fn record_sync(&mut self, now: TimestampUs) {
        self.syncs += 1;
        self.touch(now);
    }

    /// Fold a finished sequential run into the run-length distribution
    #[inline]
    pub fn record_completed_run(&mut self, direction: Direction, blocks: u64) {
        if blocks == 0 {
            return;
        }
        match direction {
            Direction::Read => self.read_runs.record(blocks as f64),
            Direction::Write => self.write_runs.record(blocks as f64),
        }
    }

    fn record_pattern(&mut self, direction: Direction, pattern: SeqResult) {
        match (direction, pattern.is_sequential) {
            (Direction::Read, true) => self.sequential_reads += 1,
            (Direction::Read, false) => self.random_reads += 1,
            (Direction::Write, true) => self.sequential_writes += 1,
            (Direction::Write, false) => self.random_writes += 1,
        }
        self.record_completed_run(direction, pattern.completed_run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smgrstat_core::{Fork, StorageLocation};

    fn key() -> Key {
        Key::new(StorageLocation::new(1663, 5, 16384), Fork::Main)
    }

    const RANDOM: SeqResult = SeqResult {
        is_sequential: false,
        completed_run: 0,
    };

    #[test]
    fn test_new_entry_is_idle() {
        let entry = Entry::new(key());
        assert!(!entry.is_active());
        assert!(!entry.meta.valid);
        assert!(Entry::new(Key::temp_aggregate(5)).meta.valid);
    }

    #[test]
    fn test_active_seconds_counts_distinct_seconds() {
        let mut entry = Entry::new(key());
        entry.touch(10_000_000);
        entry.touch(10_500_000);
        entry.touch(11_000_001);
        entry.touch(15_000_000);
        assert_eq!(entry.active_seconds, 3);
        assert_eq!(entry.first_access, 10_000_000);
        assert_eq!(entry.last_access, 15_000_000);
    }

    #[test]
    fn test_reset_preserves_carry_over_state() {
        let mut entry = Entry::new(key());
        entry.meta.valid = true;
        entry.record_read(1, RANDOM, 40, 1_000_000);
        entry.record_read(1, RANDOM, 40, 1_000_200);
        entry.record_write(2, RANDOM, 90, 1_000_300);
        entry.reset_period();

        assert_eq!(entry.reads, 0);
        assert_eq!(entry.read_timing.count(), 0);
        assert_eq!(entry.read_burst.iat.count(), 0);
        assert!(!entry.is_active());
        assert!(entry.meta.valid);
        assert_eq!(entry.read_burst.last_op_time, 1_000_200);
        assert_eq!(entry.write_burst.last_op_time, 1_000_300);

        // Same second as before the reset: no new active second
        entry.record_read(1, RANDOM, 40, 1_000_900);
        assert_eq!(entry.active_seconds, 0);
        // IAT across the period boundary is still measured
        assert_eq!(entry.read_burst.iat.count(), 1);
    }

    #[test]
    fn test_pattern_counters_and_runs() {
        let mut entry = Entry::new(key());
        entry.record_read(1, RANDOM, 1, 1);
        entry.record_read(
            1,
            SeqResult {
                is_sequential: true,
                completed_run: 0,
            },
            1,
            2,
        );
        entry.record_read(
            1,
            SeqResult {
                is_sequential: false,
                completed_run: 2,
            },
            1,
            3,
        );
        assert_eq!(entry.sequential_reads, 1);
        assert_eq!(entry.random_reads, 2);
        assert_eq!(entry.read_runs.count(), 1);
    }

    #[test]
    fn test_extend_counts_blocks() {
        let mut entry = Entry::new(key());
        entry.record_extend(1, 5);
        entry.record_extend(8, 6);
        assert_eq!(entry.extends, 2);
        assert_eq!(entry.extend_blocks, 9);
    }
}
