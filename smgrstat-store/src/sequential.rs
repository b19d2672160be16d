//! # Sequential / Random Classification
//!
//! Each session keeps a private map from key to the last block it touched in
//! each direction. An operation that starts right after the previous one
//! extends the current run; anything else ends the run and starts a new one.
//!
//! ```text
//! blocks:   10 11 12 13   40   41 42   7
//!           R  S  S  S    R    S  S    R
//! runs:     └── 4 ────┘   └─ 3 ──┘     (1, flushed on close)
//! ```
//!
//! The map is session-local, so it needs no locking. Completed runs are
//! folded into the shared entry by the caller; runs still open when the
//! session ends are pushed by [`AccessTracker::flush_runs`].

use std::collections::HashMap;

use smgrstat_core::{BlockNumber, Direction, Key};

use crate::store::StatsStore;

/// Classification of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeqResult {
    pub is_sequential: bool,
    /// Length of the run this operation ended, zero when none ended
    pub completed_run: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DirectionState {
    last_block: Option<BlockNumber>,
    current_run: u64,
}

impl DirectionState {
    fn check(&mut self, blocknum: BlockNumber, nblocks: u32) -> SeqResult {
        let follows = self
            .last_block
            .and_then(|last| last.checked_add(1))
            .map_or(false, |next| next == blocknum);

        let result = if follows {
            self.current_run += u64::from(nblocks);
            SeqResult {
                is_sequential: true,
                completed_run: 0,
            }
        } else {
            let completed = self.current_run;
            self.current_run = u64::from(nblocks);
            SeqResult {
                is_sequential: false,
                completed_run: completed,
            }
        };

        self.last_block = Some(blocknum.saturating_add(nblocks.max(1) - 1));
        result
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LocalPattern {
    read: DirectionState,
    write: DirectionState,
}

impl LocalPattern {
    fn direction(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }
}

/// Session-local access pattern cache
#[derive(Debug, Default)]
pub struct AccessTracker {
    patterns: HashMap<Key, LocalPattern>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify an operation covering `nblocks` blocks starting at `blocknum`
    ///
    /// The first operation on a key is always random.
    pub fn check(&mut self, key: Key, blocknum: BlockNumber, nblocks: u32, direction: Direction) -> SeqResult {
        self.patterns
            .entry(key)
            .or_default()
            .direction(direction)
            .check(blocknum, nblocks)
    }

    /// Push every open run into the shared store and clear it
    ///
    /// Uses `find` only: keys whose entry no longer exists are skipped.
    /// Returns the number of runs recorded.
    pub fn flush_runs(&mut self, store: &StatsStore) -> usize {
        let mut flushed = 0;
        for (key, pattern) in self.patterns.iter_mut() {
            if pattern.read.current_run == 0 && pattern.write.current_run == 0 {
                continue;
            }
            if let Some(mut entry) = store.find(key) {
                for direction in [Direction::Read, Direction::Write] {
                    let state = pattern.direction(direction);
                    if state.current_run > 0 {
                        entry.record_completed_run(direction, state.current_run);
                        flushed += 1;
                    }
                }
            }
            pattern.read.current_run = 0;
            pattern.write.current_run = 0;
        }
        flushed
    }

    /// Keys with cached state
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
