//! # Periodic Collector
//!
//! A single background thread that drains the shared region into a
//! [`HistorySink`].
//!
//! ## Collection Cycle
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ wait(interval) ── Reload ──> re-read config, keep waiting     │
//! │      │          ── Shutdown ─> final collection, exit         │
//! │      ▼ timeout                                                │
//! │ 1. snapshot(reset)            close the period               │
//! │ 2. resolve metadata           on detached copies             │
//! │ 3. insert history rows        failure: warn, count, go on    │
//! │ 4. drain lineage queue        resolve identity, insert       │
//! │ 5. retention sweep            skipped when horizon <= 0      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed step never stops later cycles. Rows of a batch the sink refused
//! are lost; the store has already been reset.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use smgrstat_core::error::{Error, Result};
use smgrstat_core::metrics::Timer;
use smgrstat_core::types::INVALID_OID;
use smgrstat_core::{Config, Key, SharedConfig};

use crate::catalog::Catalog;
use crate::clock::{to_datetime, Clock};
use crate::context::MayBlock;
use crate::history::{HistoryBatch, HistoryRow, HistorySink, LineageRow};
use crate::lineage::LineageEvent;
use crate::metadata::{lookup_metadata, resolve_snapshot};
use crate::region::SharedRegion;

/// Control messages for a running collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorSignal {
    /// Re-read the shared configuration
    Reload,
    /// Run one last collection and stop
    Shutdown,
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub bucket_id: u64,
    /// History rows accepted by the sink
    pub rows: usize,
    /// Snapshot copies that gained metadata during this cycle
    pub metadata_resolved: usize,
    /// Lineage rows accepted by the sink
    pub lineage_rows: usize,
    /// Rows removed by retention
    pub expired: usize,
    /// Sink calls that failed
    pub sink_errors: usize,
}

/// Drains the shared region into a sink
pub struct Collector<S: HistorySink> {
    region: Arc<SharedRegion>,
    catalog: Arc<dyn Catalog>,
    config: SharedConfig,
    settings: Config,
    clock: Arc<dyn Clock>,
    sink: S,
}

impl<S: HistorySink> Collector<S> {
    pub fn new(
        region: Arc<SharedRegion>,
        catalog: Arc<dyn Catalog>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
        sink: S,
    ) -> Self {
        let settings = config.get();
        Self {
            region,
            catalog,
            config,
            settings,
            clock,
            sink,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Pick up configuration changes
    pub fn reload(&mut self) {
        self.settings = self.config.get();
        info!(
            interval_secs = self.settings.collector.collection_interval_secs,
            retention_hours = self.settings.collector.retention_hours,
            "Collector configuration reloaded"
        );
    }

    /// Run one full collection cycle
    pub fn collect_once(&mut self) -> CollectionReport {
        let timer = Timer::new("collection");
        let cx = MayBlock::assert_safe_point();
        let metrics = self.region.metrics().clone();

        let mut snapshot = self.region.store().snapshot(true);
        let collected_at = to_datetime(self.clock.now_us());
        let mut report = CollectionReport {
            bucket_id: snapshot.bucket_id,
            ..Default::default()
        };

        report.metadata_resolved = resolve_snapshot(&mut snapshot.entries, self.catalog.as_ref(), &cx);

        if !snapshot.entries.is_empty() {
            let batch = HistoryBatch {
                bucket_id: snapshot.bucket_id,
                collected_at,
                rows: snapshot
                    .entries
                    .iter()
                    .map(|entry| HistoryRow::from_entry(snapshot.bucket_id, collected_at, entry))
                    .collect(),
            };
            match self.sink.insert_history(&batch) {
                Ok(()) => report.rows = batch.rows.len(),
                Err(e) => {
                    warn!(
                        error = %e,
                        code = e.error_code(),
                        bucket_id = batch.bucket_id,
                        rows = batch.rows.len(),
                        "Failed to persist history batch"
                    );
                    metrics.record_sink_failure();
                    report.sink_errors += 1;
                }
            }
        }

        let events = self.region.lineage().drain();
        if !events.is_empty() {
            let rows: Vec<LineageRow> = events
                .iter()
                .map(|event| self.lineage_row(event, collected_at, &cx))
                .collect();
            match self.sink.insert_lineage(&rows) {
                Ok(()) => report.lineage_rows = rows.len(),
                Err(e) => {
                    warn!(error = %e, events = rows.len(), "Failed to persist lineage events");
                    metrics.record_sink_failure();
                    report.sink_errors += 1;
                }
            }
        }

        if let Some(horizon) = self.settings.collector.retention() {
            let cutoff = chrono::Duration::from_std(horizon)
                .ok()
                .and_then(|horizon| collected_at.checked_sub_signed(horizon));
            match cutoff {
                Some(cutoff) => match self.sink.delete_older_than(cutoff) {
                    Ok(expired) => {
                        report.expired = expired;
                        metrics.record_rows_expired(expired as u64);
                    }
                    Err(e) => {
                        warn!(error = %e, "Retention sweep failed");
                        metrics.record_sink_failure();
                        report.sink_errors += 1;
                    }
                },
                None => warn!(
                    retention_hours = self.settings.collector.retention_hours,
                    "Retention horizon out of range, skipping sweep"
                ),
            }
        }

        metrics.record_collection(report.rows as u64, report.lineage_rows as u64);
        let elapsed = timer.stop();
        debug!(
            bucket_id = report.bucket_id,
            rows = report.rows,
            lineage_rows = report.lineage_rows,
            expired = report.expired,
            elapsed_us = elapsed.as_micros() as u64,
            "Collection finished"
        );
        report
    }

    /// Lineage row with the new location's identity when it is resolvable here
    fn lineage_row(&self, event: &LineageEvent, recorded_at: DateTime<Utc>, cx: &MayBlock) -> LineageRow {
        let mut row = LineageRow::unresolved(event, recorded_at);
        let database = event.new.database;
        if database != self.catalog.database() && database != INVALID_OID {
            return row;
        }
        if let Some(meta) = lookup_metadata(self.catalog.as_ref(), &Key::new(event.new, event.fork), cx) {
            row.relid = meta.relid;
            row.name = meta.name;
            row.namespace = meta.namespace;
        }
        row
    }

    /// Collect on every interval until shut down, then collect once more
    pub fn run(mut self, signals: Receiver<CollectorSignal>) -> S {
        info!(
            region = self.region.name(),
            database = %self.settings.collector.database,
            interval_secs = self.settings.collector.collection_interval_secs,
            "Collector started"
        );

        let mut last_collection = Instant::now();
        loop {
            let deadline = last_collection + self.settings.collector.collection_interval();
            let wait = deadline.saturating_duration_since(Instant::now());
            match signals.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {
                    self.collect_once();
                    last_collection = Instant::now();
                }
                Ok(CollectorSignal::Reload) => self.reload(),
                Ok(CollectorSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let report = self.collect_once();
        info!(rows = report.rows, "Collector stopped after final collection");
        self.sink
    }
}

impl<S: HistorySink + 'static> Collector<S> {
    /// Run the collector on its own thread
    pub fn spawn(self) -> Result<CollectorHandle<S>> {
        let (signals, receiver) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("smgrstat-collector".into())
            .spawn(move || self.run(receiver))?;
        Ok(CollectorHandle {
            signals,
            thread: Some(thread),
        })
    }
}

/// Handle to a collector thread; dropping it shuts the collector down
pub struct CollectorHandle<S> {
    signals: Sender<CollectorSignal>,
    thread: Option<JoinHandle<S>>,
}

impl<S> CollectorHandle<S> {
    /// Ask the collector to re-read its configuration
    pub fn reload(&self) -> bool {
        self.signals.send(CollectorSignal::Reload).is_ok()
    }

    /// Stop the collector after a final collection and get the sink back
    pub fn shutdown(mut self) -> Result<S> {
        let _ = self.signals.send(CollectorSignal::Shutdown);
        let thread = self.thread.take().ok_or_else(|| Error::Internal {
            message: "collector already stopped".to_string(),
        })?;
        thread.join().map_err(|_| Error::Internal {
            message: "collector thread panicked".to_string(),
        })
    }
}

impl<S> Drop for CollectorHandle<S> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.signals.send(CollectorSignal::Shutdown);
            let _ = thread.join();
        }
    }
}

/// Rows for the period in progress, without resetting anything
pub fn current_rows(region: &SharedRegion, catalog: &dyn Catalog, now: DateTime<Utc>, cx: &MayBlock) -> Vec<HistoryRow> {
    let mut snapshot = region.store().snapshot(false);
    resolve_snapshot(&mut snapshot.entries, catalog, cx);
    snapshot
        .entries
        .iter()
        .map(|entry| HistoryRow::from_entry(snapshot.bucket_id, now, entry))
        .collect()
}
