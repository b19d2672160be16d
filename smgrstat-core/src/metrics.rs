//! # Self-Metrics
//!
//! Counters describing the statistics subsystem itself: how many entries it
//! created, how many lineage events it dropped, how collections went.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Store metrics
    entries_created: AtomicU64,
    operations_recorded: AtomicU64,

    // Metadata metrics
    metadata_resolved: AtomicU64,
    metadata_unresolved: AtomicU64,
    metadata_races: AtomicU64,

    // Lineage metrics
    lineage_queued: AtomicU64,
    lineage_dropped: AtomicU64,

    // Collector metrics
    collections: AtomicU64,
    rows_collected: AtomicU64,
    lineage_rows_collected: AtomicU64,
    sink_failures: AtomicU64,
    rows_expired: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new store entry
    pub fn record_entry_created(&self) {
        self.inner.entries_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one intercepted storage operation
    pub fn record_operation(&self) {
        self.inner.operations_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a metadata lookup that was applied to an entry
    pub fn record_metadata_resolved(&self) {
        self.inner.metadata_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a metadata lookup that found nothing
    pub fn record_metadata_unresolved(&self) {
        self.inner.metadata_unresolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup whose result lost to another resolver or an eviction
    pub fn record_metadata_race(&self) {
        self.inner.metadata_races.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lineage event accepted by the queue
    pub fn record_lineage_queued(&self) {
        self.inner.lineage_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lineage event dropped because the queue was full
    pub fn record_lineage_dropped(&self) {
        self.inner.lineage_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed collection cycle
    pub fn record_collection(&self, rows: u64, lineage_rows: u64) {
        self.inner.collections.fetch_add(1, Ordering::Relaxed);
        self.inner.rows_collected.fetch_add(rows, Ordering::Relaxed);
        self.inner.lineage_rows_collected.fetch_add(lineage_rows, Ordering::Relaxed);
    }

    /// Record a failed sink call
    pub fn record_sink_failure(&self) {
        self.inner.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rows removed by the retention sweep
    pub fn record_rows_expired(&self, rows: u64) {
        self.inner.rows_expired.fetch_add(rows, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_created: self.inner.entries_created.load(Ordering::Relaxed),
            operations_recorded: self.inner.operations_recorded.load(Ordering::Relaxed),
            metadata_resolved: self.inner.metadata_resolved.load(Ordering::Relaxed),
            metadata_unresolved: self.inner.metadata_unresolved.load(Ordering::Relaxed),
            metadata_races: self.inner.metadata_races.load(Ordering::Relaxed),
            lineage_queued: self.inner.lineage_queued.load(Ordering::Relaxed),
            lineage_dropped: self.inner.lineage_dropped.load(Ordering::Relaxed),
            collections: self.inner.collections.load(Ordering::Relaxed),
            rows_collected: self.inner.rows_collected.load(Ordering::Relaxed),
            lineage_rows_collected: self.inner.lineage_rows_collected.load(Ordering::Relaxed),
            sink_failures: self.inner.sink_failures.load(Ordering::Relaxed),
            rows_expired: self.inner.rows_expired.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub entries_created: u64,
    pub operations_recorded: u64,
    pub metadata_resolved: u64,
    pub metadata_unresolved: u64,
    pub metadata_races: u64,
    pub lineage_queued: u64,
    pub lineage_dropped: u64,
    pub collections: u64,
    pub rows_collected: u64,
    pub lineage_rows_collected: u64,
    pub sink_failures: u64,
    pub rows_expired: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start new timer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) -> Duration {
        let duration = self.elapsed();
        tracing::debug!(
            name = %self.name,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
        duration
    }
}
