//! # History Rows and Sinks
//!
//! The collector turns snapshot entries into [`HistoryRow`]s and lineage
//! events into [`LineageRow`]s, then hands them to a [`HistorySink`].
//!
//! ## JSON-lines Layout
//!
//! ```text
//! <base>/
//! ├── lineage.jsonl                  one LineageRow per line
//! └── history/
//!     ├── 2024-01-15/
//!     │   ├── 13.jsonl               rows collected 13:00-14:00 UTC
//!     │   └── 14.jsonl
//!     └── 2024-01-16/
//!         └── 00.jsonl
//!
//! Retention: whole hour files older than the horizon are removed, the
//! file straddling the horizon is rewritten without its expired rows.
//! ```

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use smgrstat_core::error::{Error, Result, ResultExt};
use smgrstat_core::{Fork, Key, Oid, OnlineStats, RelKind, StorageLocation, TimingHistogram};

use crate::clock::to_datetime;
use crate::entry::Entry;
use crate::lineage::LineageEvent;

/// One persisted statistics row: one key, one collection period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub bucket_id: u64,
    pub collected_at: DateTime<Utc>,

    pub tablespace: Oid,
    pub database: Oid,
    pub file_number: Oid,
    pub fork: Fork,

    pub relid: Option<Oid>,
    pub parent_relid: Option<Oid>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub kind: Option<RelKind>,

    pub reads: u64,
    pub read_blocks: u64,
    pub writes: u64,
    pub write_blocks: u64,
    pub extends: u64,
    pub extend_blocks: u64,
    pub truncates: u64,
    pub syncs: u64,

    pub read_hist: Option<Vec<u64>>,
    pub read_count: Option<u64>,
    pub read_total_us: Option<u64>,
    pub read_min_us: Option<u64>,
    pub read_max_us: Option<u64>,

    pub write_hist: Option<Vec<u64>>,
    pub write_count: Option<u64>,
    pub write_total_us: Option<u64>,
    pub write_min_us: Option<u64>,
    pub write_max_us: Option<u64>,

    pub read_iat_mean_us: Option<f64>,
    pub read_iat_cov: Option<f64>,
    pub write_iat_mean_us: Option<f64>,
    pub write_iat_cov: Option<f64>,

    pub sequential_reads: u64,
    pub random_reads: u64,
    pub sequential_writes: u64,
    pub random_writes: u64,

    pub read_run_mean: Option<f64>,
    pub read_run_cov: Option<f64>,
    pub read_run_count: u64,
    pub write_run_mean: Option<f64>,
    pub write_run_cov: Option<f64>,
    pub write_run_count: u64,

    pub active_seconds: u64,
    pub first_access: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// Histogram columns; all absent when the histogram is empty
struct TimingColumns {
    hist: Option<Vec<u64>>,
    count: Option<u64>,
    total_us: Option<u64>,
    min_us: Option<u64>,
    max_us: Option<u64>,
}

impl From<&TimingHistogram> for TimingColumns {
    fn from(hist: &TimingHistogram) -> Self {
        if hist.is_empty() {
            return Self {
                hist: None,
                count: None,
                total_us: None,
                min_us: None,
                max_us: None,
            };
        }
        Self {
            hist: Some(hist.bins().to_vec()),
            count: Some(hist.count()),
            total_us: Some(hist.total_us()),
            min_us: hist.min_us(),
            max_us: hist.max_us(),
        }
    }
}

/// Mean and CoV, both absent below two observations
fn summary(stats: &OnlineStats) -> (Option<f64>, Option<f64>) {
    match stats.mean() {
        Some(mean) => (Some(mean), stats.cov()),
        None => (None, None),
    }
}

impl HistoryRow {
    pub fn from_entry(bucket_id: u64, collected_at: DateTime<Utc>, entry: &Entry) -> Self {
        let meta = if entry.meta.valid {
            entry.meta.clone()
        } else {
            Default::default()
        };
        let read = TimingColumns::from(&entry.read_timing);
        let write = TimingColumns::from(&entry.write_timing);
        let (read_iat_mean_us, read_iat_cov) = summary(&entry.read_burst.iat);
        let (write_iat_mean_us, write_iat_cov) = summary(&entry.write_burst.iat);
        let (read_run_mean, read_run_cov) = summary(&entry.read_runs);
        let (write_run_mean, write_run_cov) = summary(&entry.write_runs);
        let location = entry.key.location;

        Self {
            bucket_id,
            collected_at,
            tablespace: location.tablespace,
            database: location.database,
            file_number: location.file_number,
            fork: entry.key.fork,
            relid: meta.relid,
            parent_relid: meta.parent_relid,
            name: meta.name,
            namespace: meta.namespace,
            kind: meta.kind,
            reads: entry.reads,
            read_blocks: entry.read_blocks,
            writes: entry.writes,
            write_blocks: entry.write_blocks,
            extends: entry.extends,
            extend_blocks: entry.extend_blocks,
            truncates: entry.truncates,
            syncs: entry.syncs,
            read_hist: read.hist,
            read_count: read.count,
            read_total_us: read.total_us,
            read_min_us: read.min_us,
            read_max_us: read.max_us,
            write_hist: write.hist,
            write_count: write.count,
            write_total_us: write.total_us,
            write_min_us: write.min_us,
            write_max_us: write.max_us,
            read_iat_mean_us,
            read_iat_cov,
            write_iat_mean_us,
            write_iat_cov,
            sequential_reads: entry.sequential_reads,
            random_reads: entry.random_reads,
            sequential_writes: entry.sequential_writes,
            random_writes: entry.random_writes,
            read_run_mean,
            read_run_cov,
            read_run_count: entry.read_runs.count(),
            write_run_mean,
            write_run_cov,
            write_run_count: entry.write_runs.count(),
            active_seconds: entry.active_seconds,
            first_access: to_datetime(entry.first_access),
            last_access: to_datetime(entry.last_access),
        }
    }

    pub fn key(&self) -> Key {
        Key::new(
            StorageLocation::new(self.tablespace, self.database, self.file_number),
            self.fork,
        )
    }
}

/// Rows of one collection period
#[derive(Debug, Clone)]
pub struct HistoryBatch {
    pub bucket_id: u64,
    pub collected_at: DateTime<Utc>,
    pub rows: Vec<HistoryRow>,
}

/// One persisted file identity change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRow {
    pub recorded_at: DateTime<Utc>,
    pub old: StorageLocation,
    pub new: StorageLocation,
    pub fork: Fork,
    pub is_replay: bool,
    pub relid: Option<Oid>,
    pub name: Option<String>,
    pub namespace: Option<String>,
}

impl LineageRow {
    pub fn unresolved(event: &LineageEvent, recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            old: event.old,
            new: event.new,
            fork: event.fork,
            is_replay: event.is_replay,
            relid: None,
            name: None,
            namespace: None,
        }
    }
}

/// Durable destination for collected statistics
pub trait HistorySink: Send {
    fn insert_history(&mut self, batch: &HistoryBatch) -> Result<()>;

    fn insert_lineage(&mut self, rows: &[LineageRow]) -> Result<()>;

    /// Delete history rows collected before `cutoff`, returning how many
    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Walk lineage backwards from `current`, newest association first
///
/// Each step follows the most recent row whose `new` location matches. The
/// walk stops at a location already visited.
pub fn lineage_chain(rows: &[LineageRow], current: StorageLocation, fork: Fork) -> Vec<LineageRow> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut location = current;

    while visited.insert(location) {
        let step = rows
            .iter()
            .filter(|row| row.fork == fork && row.new == location)
            .max_by_key(|row| row.recorded_at);
        match step {
            Some(row) => {
                chain.push(row.clone());
                location = row.old;
            }
            None => break,
        }
    }
    chain
}

// =============================================================================
// In-memory sink
// =============================================================================

#[derive(Default)]
struct MemoryTables {
    history: Vec<HistoryRow>,
    lineage: Vec<LineageRow>,
    batches: usize,
    failures_remaining: usize,
}

/// Sink keeping rows in memory; clones share the same tables
#[derive(Clone, Default)]
pub struct MemorySink {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` history inserts fail
    pub fn fail_next_inserts(&self, count: usize) {
        self.tables.lock().failures_remaining = count;
    }

    pub fn history(&self) -> Vec<HistoryRow> {
        self.tables.lock().history.clone()
    }

    pub fn lineage(&self) -> Vec<LineageRow> {
        self.tables.lock().lineage.clone()
    }

    /// Number of history batches accepted
    pub fn batches(&self) -> usize {
        self.tables.lock().batches
    }
}

impl HistorySink for MemorySink {
    fn insert_history(&mut self, batch: &HistoryBatch) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.failures_remaining > 0 {
            tables.failures_remaining -= 1;
            return Err(Error::sink("history table unavailable"));
        }
        tables.history.extend(batch.rows.iter().cloned());
        tables.batches += 1;
        Ok(())
    }

    fn insert_lineage(&mut self, rows: &[LineageRow]) -> Result<()> {
        self.tables.lock().lineage.extend_from_slice(rows);
        Ok(())
    }

    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.lock();
        let before = tables.history.len();
        tables.history.retain(|row| row.collected_at >= cutoff);
        Ok(before - tables.history.len())
    }
}

// =============================================================================
// JSON-lines sink
// =============================================================================

/// One hour of history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourPartition {
    pub date: NaiveDate,
    pub hour: u32,
}

impl HourPartition {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            date: dt.date_naive(),
            hour: dt.hour(),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        let naive = self.date.and_hms_opt(self.hour, 0, 0).unwrap_or_default();
        Utc.from_utc_datetime(&naive)
    }

    /// Exclusive end of the hour
    pub fn end(&self) -> DateTime<Utc> {
        self.start() + chrono::Duration::hours(1)
    }

    pub fn dir_name(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn file_name(&self) -> String {
        format!("{:02}.jsonl", self.hour)
    }
}

/// Sink writing hour-partitioned JSON-lines files
pub struct JsonlHistorySink {
    base_dir: PathBuf,
}

impl JsonlHistorySink {
    /// Open (and create) a history directory
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(base_dir.join("history"))
            .with_context(|| format!("creating history directory {}", base_dir.display()))?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn history_dir(&self) -> PathBuf {
        self.base_dir.join("history")
    }

    fn lineage_path(&self) -> PathBuf {
        self.base_dir.join("lineage.jsonl")
    }

    pub fn partition_path(&self, partition: &HourPartition) -> PathBuf {
        self.history_dir()
            .join(partition.dir_name())
            .join(partition.file_name())
    }

    /// Every hour partition on disk, oldest first
    pub fn list_partitions(&self) -> Result<Vec<HourPartition>> {
        let mut partitions = Vec::new();
        let history_dir = self.history_dir();
        if !history_dir.exists() {
            return Ok(partitions);
        }

        for day in fs::read_dir(&history_dir)? {
            let day = day?.path();
            let Some(date) = day
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok())
            else {
                continue;
            };
            for file in fs::read_dir(&day)? {
                let file = file?.path();
                if file.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let hour = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u32>().ok());
                if let Some(hour) = hour.filter(|h| *h < 24) {
                    partitions.push(HourPartition { date, hour });
                }
            }
        }

        partitions.sort();
        Ok(partitions)
    }

    /// All history rows, oldest partition first
    pub fn read_history(&self) -> Result<Vec<HistoryRow>> {
        let mut rows = Vec::new();
        for partition in self.list_partitions()? {
            rows.extend(read_jsonl::<HistoryRow>(&self.partition_path(&partition))?);
        }
        Ok(rows)
    }

    /// History rows collected at or after `since`
    pub fn read_history_since(&self, since: DateTime<Utc>) -> Result<Vec<HistoryRow>> {
        let mut rows = Vec::new();
        for partition in self.list_partitions()? {
            if partition.end() <= since {
                continue;
            }
            rows.extend(
                read_jsonl::<HistoryRow>(&self.partition_path(&partition))?
                    .into_iter()
                    .filter(|row| row.collected_at >= since),
            );
        }
        Ok(rows)
    }

    pub fn read_lineage(&self) -> Result<Vec<LineageRow>> {
        let path = self.lineage_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_jsonl(&path)
    }
}

fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

fn append_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

impl HistorySink for JsonlHistorySink {
    fn insert_history(&mut self, batch: &HistoryBatch) -> Result<()> {
        if batch.rows.is_empty() {
            return Ok(());
        }
        let partition = HourPartition::from_datetime(batch.collected_at);
        append_jsonl(&self.partition_path(&partition), &batch.rows)?;
        debug!(
            bucket_id = batch.bucket_id,
            rows = batch.rows.len(),
            partition = %format!("{}/{}", partition.dir_name(), partition.file_name()),
            "Appended history batch"
        );
        Ok(())
    }

    fn insert_lineage(&mut self, rows: &[LineageRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        append_jsonl(&self.lineage_path(), rows)
    }

    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut deleted = 0;
        for partition in self.list_partitions()? {
            if partition.start() >= cutoff {
                continue;
            }
            let path = self.partition_path(&partition);
            let rows: Vec<HistoryRow> = read_jsonl(&path)?;

            if partition.end() <= cutoff {
                fs::remove_file(&path)?;
                deleted += rows.len();
                debug!("Deleted history partition: {:?}", path);
            } else {
                let (expired, kept): (Vec<_>, Vec<_>) =
                    rows.into_iter().partition(|row| row.collected_at < cutoff);
                if expired.is_empty() {
                    continue;
                }
                let tmp = path.with_extension("jsonl.tmp");
                let _ = fs::remove_file(&tmp);
                append_jsonl(&tmp, &kept)?;
                fs::rename(&tmp, &path)?;
                deleted += expired.len();
            }

            // Remove the day directory once its last hour is gone
            if let Some(day) = path.parent() {
                if fs::read_dir(day)?.next().is_none() {
                    fs::remove_dir(day)?;
                }
            }
        }

        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Retention removed history rows");
        }
        Ok(deleted)
    }
}
