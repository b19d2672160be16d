//! # Lineage Queue
//!
//! Bounded multi-producer / single-consumer ring recording file identity
//! changes: when a rewrite gives a relation a new file number, the old and
//! new locations are queued so the collector can persist the association.
//!
//! ```text
//!            tail (consumer)            head (producers, CAS)
//!              │                          │
//!   ┌────┬────┬▼───┬────┬────┬────┬────┬─▼──┬────┐
//!   │    │    │ e3 │ e4 │ e5 │ ·· │ e7 │    │    │   capacity = 2^k
//!   └────┴────┴────┴────┴────┴────┴────┴────┴────┘
//!                              └ claimed, not yet written
//! ```
//!
//! Producers claim a position with a compare-and-swap on `head` and then
//! fill the slot. When `head - tail == capacity` the event is dropped and
//! counted; rewrites are rare so loss is acceptable. The consumer drains
//! `[tail, head)` and stops early at a claimed slot whose writer has not
//! finished, leaving it for the next drain.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use smgrstat_core::{Fork, Metrics, StorageLocation};

/// Default ring capacity
pub const DEFAULT_LINEAGE_CAPACITY: usize = 1024;

/// A file identity change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEvent {
    pub old: StorageLocation,
    pub new: StorageLocation,
    pub fork: Fork,
    /// Recorded while replaying the write-ahead log
    pub is_replay: bool,
}

/// Bounded lineage ring
pub struct LineageQueue {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    mask: u64,
    slots: Box<[Mutex<Option<LineageEvent>>]>,
    dropped: AtomicU64,
    consumer: Mutex<()>,
    metrics: Metrics,
}

impl LineageQueue {
    /// `capacity` is rounded up to a power of two
    pub fn new(capacity: usize, metrics: Metrics) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            mask: capacity as u64 - 1,
            slots,
            dropped: AtomicU64::new(0),
            consumer: Mutex::new(()),
            metrics,
        }
    }

    /// Queue an event; returns `false` if it was dropped because the ring is full
    pub fn enqueue(&self, old: StorageLocation, new: StorageLocation, fork: Fork, is_replay: bool) -> bool {
        let capacity = self.capacity() as u64;
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= capacity {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.metrics.record_lineage_dropped();
                debug!(%old, %new, dropped, "Lineage queue full, dropping event");
                return false;
            }
            match self
                .head
                .compare_exchange_weak(head, head + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        *self.slots[(head & self.mask) as usize].lock() = Some(LineageEvent {
            old,
            new,
            fork,
            is_replay,
        });
        self.metrics.record_lineage_queued();
        true
    }

    /// Take every published event in FIFO order
    pub fn drain(&self) -> Vec<LineageEvent> {
        let _consumer = self.consumer.lock();
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);

        let mut events = Vec::with_capacity(head.wrapping_sub(tail) as usize);
        let mut position = tail;
        while position != head {
            match self.slots[(position & self.mask) as usize].lock().take() {
                Some(event) => events.push(event),
                // Claimed but still being written
                None => break,
            }
            position += 1;
        }

        self.tail.store(position, Ordering::Release);
        events
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Events claimed and not yet drained
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events lost to overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
