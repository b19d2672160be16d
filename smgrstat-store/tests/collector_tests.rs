//! # Collector Integration Tests
//!
//! Full pipeline: sessions record into the shared region, the collector
//! snapshots, resolves and persists into a sink, and retention trims the
//! history afterwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rand::Rng;
use tempfile::TempDir;

use smgrstat_core::{Config, Fork, Key, RelKind, SharedConfig, StorageLocation, HIST_BINS};
use smgrstat_store::history::HourPartition;
use smgrstat_store::{
    current_rows, lineage_chain, Catalog, Clock, Collector, Entry, HistoryBatch, HistoryRow, HistorySink,
    JsonlHistorySink, ManualClock, MayBlock, MemoryCatalog, MemorySink, Relation, RelationInfo, SeqResult,
    Session, SharedRegion,
};

const DB: u32 = 5;
const SPC: u32 = 1663;
const ORDERS: u32 = 16384;
const ORDERS_PKEY: u32 = 16390;

fn catalog() -> Arc<MemoryCatalog> {
    let catalog = MemoryCatalog::new(DB);
    catalog.add_namespace(2200, "public");
    catalog.add_relation(RelationInfo {
        relid: ORDERS,
        name: "orders".to_string(),
        namespace: 2200,
        kind: RelKind::Table,
        database: DB,
        tablespace: 0,
        file_number: ORDERS,
        toast_relid: None,
        indexed_relid: None,
    });
    catalog.add_relation(RelationInfo {
        relid: ORDERS_PKEY,
        name: "orders_pkey".to_string(),
        namespace: 2200,
        kind: RelKind::Index,
        database: DB,
        tablespace: 0,
        file_number: ORDERS_PKEY,
        toast_relid: None,
        indexed_relid: Some(ORDERS),
    });
    Arc::new(catalog)
}

fn start_us() -> i64 {
    Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 0).unwrap().timestamp_micros()
}

struct Fixture {
    region: Arc<SharedRegion>,
    catalog: Arc<MemoryCatalog>,
    config: SharedConfig,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        Self {
            region: Arc::new(SharedRegion::new("collector-tests", &config)),
            catalog: catalog(),
            config: SharedConfig::new(config),
            clock: Arc::new(ManualClock::new(start_us())),
        }
    }

    fn session(&self) -> Session {
        Session::new(
            Arc::clone(&self.region),
            self.catalog.clone() as Arc<dyn Catalog>,
            self.config.clone(),
            self.clock.clone() as Arc<dyn Clock>,
        )
    }

    fn collector<S: HistorySink>(&self, sink: S) -> Collector<S> {
        Collector::new(
            Arc::clone(&self.region),
            self.catalog.clone() as Arc<dyn Catalog>,
            self.config.clone(),
            self.clock.clone() as Arc<dyn Clock>,
            sink,
        )
    }
}

fn rel(file_number: u32) -> Relation {
    Relation::new(StorageLocation::new(SPC, DB, file_number))
}

fn loc(file_number: u32) -> StorageLocation {
    StorageLocation::new(SPC, DB, file_number)
}

const LATENCY: Duration = Duration::from_micros(120);

// ============================================================================
// Collection Cycle Tests
// ============================================================================

mod cycle_tests {
    use super::*;

    #[test]
    fn test_collect_once_persists_rows() {
        let fx = Fixture::new();
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());

        // Recorded without a safe point: metadata comes from the collector
        let mut session = fx.session();
        session.record_read(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);
        session.record_read(&rel(ORDERS_PKEY), Fork::Main, 3, 1, LATENCY);

        let report = collector.collect_once();
        assert_eq!(report.bucket_id, 1);
        assert_eq!(report.rows, 2);
        assert_eq!(report.metadata_resolved, 2);
        assert_eq!(report.sink_errors, 0);

        let rows = sink.history();
        assert_eq!(rows.len(), 2);
        let index = rows.iter().find(|r| r.file_number == ORDERS_PKEY).unwrap();
        assert_eq!(index.name.as_deref(), Some("orders_pkey"));
        assert_eq!(index.parent_relid, Some(ORDERS));
        assert_eq!(index.collected_at.timestamp_micros(), start_us());
    }

    #[test]
    fn test_idle_cycle_writes_nothing() {
        let fx = Fixture::new();
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());

        let mut session = fx.session();
        session.open(&rel(ORDERS));

        let report = collector.collect_once();
        assert_eq!(report.rows, 0);
        assert_eq!(sink.batches(), 0);
        assert_eq!(fx.region.metrics().snapshot().collections, 1);
    }

    #[test]
    fn test_period_counters_reset_between_cycles() {
        let fx = Fixture::new();
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());
        let mut session = fx.session();

        session.record_write(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);
        session.record_write(&rel(ORDERS), Fork::Main, 1, 1, LATENCY);
        collector.collect_once();

        fx.clock.advance_secs(60);
        session.record_write(&rel(ORDERS), Fork::Main, 2, 1, LATENCY);
        let report = collector.collect_once();
        assert_eq!(report.bucket_id, 2);

        let rows = sink.history();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].writes, 2);
        assert_eq!(rows[1].writes, 1);
        assert_eq!(rows[1].write_count, Some(1));
        assert!(rows[1].first_access > rows[0].last_access);
    }

    #[test]
    fn test_sink_failure_is_isolated() {
        let fx = Fixture::new();
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());
        let mut session = fx.session();

        sink.fail_next_inserts(1);
        session.record_read(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);
        let failed = collector.collect_once();
        assert_eq!(failed.sink_errors, 1);
        assert_eq!(failed.rows, 0);
        assert!(sink.history().is_empty());

        session.record_read(&rel(ORDERS), Fork::Main, 1, 1, LATENCY);
        let recovered = collector.collect_once();
        assert_eq!(recovered.sink_errors, 0);
        assert_eq!(recovered.rows, 1);
        assert!(recovered.bucket_id > failed.bucket_id);

        let stats = fx.region.metrics().snapshot();
        assert_eq!(stats.sink_failures, 1);
        assert_eq!(stats.collections, 2);
    }

    #[test]
    fn test_lineage_rows_carry_identity() {
        let fx = Fixture::new();
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());
        let mut session = fx.session();

        fx.catalog.rewrite(ORDERS, 16500);
        session.create(&rel(16500), Fork::Main, Some(loc(ORDERS)), false);
        session.record_write(&rel(16500), Fork::Main, 0, 1, LATENCY);

        let report = collector.collect_once();
        assert_eq!(report.lineage_rows, 1);

        let lineage = sink.lineage();
        assert_eq!(lineage[0].old, loc(ORDERS));
        assert_eq!(lineage[0].new, loc(16500));
        assert_eq!(lineage[0].relid, Some(ORDERS));
        assert_eq!(lineage[0].name.as_deref(), Some("orders"));
    }

    #[test]
    fn test_current_rows_do_not_reset() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.record_read(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);

        let cx = MayBlock::assert_safe_point();
        let now = Utc::now();
        let rows = current_rows(&fx.region, fx.catalog.as_ref(), now, &cx);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("orders"));
        assert_eq!(rows[0].bucket_id, fx.region.store().current_bucket());

        let again = current_rows(&fx.region, fx.catalog.as_ref(), now, &cx);
        assert_eq!(again[0].reads, 1);
    }
}

// ============================================================================
// Retention Tests
// ============================================================================

mod retention_tests {
    use super::*;

    #[test]
    fn test_old_rows_expire() {
        let fx = Fixture::new();
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());
        let mut session = fx.session();

        session.record_read(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);
        collector.collect_once();

        fx.clock.advance_secs(200 * 3600);
        session.record_read(&rel(ORDERS), Fork::Main, 1, 1, LATENCY);
        let report = collector.collect_once();

        assert_eq!(report.expired, 1);
        let rows = sink.history();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket_id, 2);
        assert_eq!(fx.region.metrics().snapshot().rows_expired, 1);
    }

    #[test]
    fn test_non_positive_retention_keeps_everything() {
        let mut config = Config::default();
        config.collector.retention_hours = 0;
        let fx = Fixture::with_config(config);
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());
        let mut session = fx.session();

        for i in 0..3 {
            session.record_read(&rel(ORDERS), Fork::Main, i, 1, LATENCY);
            collector.collect_once();
            fx.clock.advance_secs(1000 * 3600);
        }

        assert_eq!(sink.history().len(), 3);
        assert_eq!(fx.region.metrics().snapshot().rows_expired, 0);
    }

    #[test]
    fn test_reload_picks_up_retention() {
        let fx = Fixture::new();
        let sink = MemorySink::new();
        let mut collector = fx.collector(sink.clone());
        let mut session = fx.session();

        session.record_read(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);
        collector.collect_once();

        let mut config = fx.config.get();
        config.collector.retention_hours = 1;
        fx.config.replace(config).unwrap();
        collector.reload();

        fx.clock.advance_secs(2 * 3600);
        let report = collector.collect_once();
        assert_eq!(report.expired, 1);
        assert!(sink.history().is_empty());
    }
    #[test]
    fn test_horizon_past_calendar_range_skips_sweep() {
        for retention_hours in [3_000_000_000, i64::MAX] {
            let mut config = Config::default();
            config.collector.retention_hours = retention_hours;
            let fx = Fixture::with_config(config);
            let sink = MemorySink::new();
            let mut collector = fx.collector(sink.clone());
            let mut session = fx.session();

            for i in 0..2 {
                session.record_read(&rel(ORDERS), Fork::Main, i, 1, LATENCY);
                let report = collector.collect_once();
                assert_eq!(report.expired, 0);
                assert_eq!(report.sink_errors, 0);
            }
            assert_eq!(sink.history().len(), 2);
        }
    }
}

// ============================================================================
// Background Thread Tests
// ============================================================================

mod thread_tests {
    use super::*;

    #[test]
    fn test_final_collection_on_shutdown() {
        let mut config = Config::default();
        config.collector.collection_interval_secs = 3600;
        let fx = Fixture::with_config(config);

        let handle = fx.collector(MemorySink::new()).spawn().unwrap();
        assert!(handle.reload());

        let mut session = fx.session();
        session.record_write(&rel(ORDERS), Fork::Main, 0, 4, LATENCY);
        session.close();

        let sink = handle.shutdown().unwrap();
        let rows = sink.history();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].write_blocks, 4);
        assert_eq!(rows[0].name.as_deref(), Some("orders"));
    }

    #[test]
    fn test_interval_collections_run() {
        let mut config = Config::default();
        config.collector.collection_interval_secs = 1;
        let fx = Fixture::with_config(config);
        let sink = MemorySink::new();
        let handle = fx.collector(sink.clone()).spawn().unwrap();

        let mut session = fx.session();
        session.record_read(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);
        std::thread::sleep(Duration::from_millis(1500));
        drop(handle);

        assert!(fx.region.metrics().snapshot().collections >= 2);
        assert_eq!(sink.history().len(), 1);
    }
}

// ============================================================================
// JSON-lines Sink Tests
// ============================================================================

mod jsonl_tests {
    use super::*;

    fn row_at(bucket_id: u64, at: chrono::DateTime<Utc>) -> HistoryRow {
        let mut entry = Entry::new(Key::new(loc(ORDERS), Fork::Main));
        entry.record_read(1, SeqResult::default(), 50, at.timestamp_micros());
        HistoryRow::from_entry(bucket_id, at, &entry)
    }

    fn batch(bucket_id: u64, at: chrono::DateTime<Utc>) -> HistoryBatch {
        HistoryBatch {
            bucket_id,
            collected_at: at,
            rows: vec![row_at(bucket_id, at)],
        }
    }

    #[test]
    fn test_collector_writes_hour_partitions() {
        let dir = TempDir::new().unwrap();
        let fx = Fixture::new();
        let mut collector = fx.collector(JsonlHistorySink::open(dir.path()).unwrap());
        let mut session = fx.session();

        session.record_read(&rel(ORDERS), Fork::Main, 0, 1, LATENCY);
        collector.collect_once();

        let expected = dir.path().join("history").join("2024-03-10").join("14.jsonl");
        assert!(expected.exists());

        let rows = collector.sink().read_history().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("orders"));
        assert_eq!(rows[0].read_hist.as_ref().map(Vec::len), Some(HIST_BINS));
    }

    #[test]
    fn test_retention_rewrites_straddling_partition() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonlHistorySink::open(dir.path()).unwrap();
        let at = |h, m| Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap();

        sink.insert_history(&batch(1, at(8, 10))).unwrap();
        sink.insert_history(&batch(2, at(10, 15))).unwrap();
        sink.insert_history(&batch(3, at(10, 45))).unwrap();
        assert_eq!(sink.list_partitions().unwrap().len(), 2);

        let deleted = sink.delete_older_than(at(10, 30)).unwrap();
        assert_eq!(deleted, 2);

        let partitions = sink.list_partitions().unwrap();
        assert_eq!(partitions, vec![HourPartition::from_datetime(at(10, 0))]);
        let rows = sink.read_history().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket_id, 3);
    }

    #[test]
    fn test_read_history_since() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonlHistorySink::open(dir.path()).unwrap();
        let at = |h, m| Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap();

        for (bucket, hour) in [(1, 9), (2, 11), (3, 12)] {
            sink.insert_history(&batch(bucket, at(hour, 5))).unwrap();
        }

        let rows = sink.read_history_since(at(11, 0)).unwrap();
        let buckets: Vec<u64> = rows.iter().map(|r| r.bucket_id).collect();
        assert_eq!(buckets, vec![2, 3]);
    }

    #[test]
    fn test_lineage_chain_across_rewrites() {
        let dir = TempDir::new().unwrap();
        let fx = Fixture::new();
        let mut collector = fx.collector(JsonlHistorySink::open(dir.path()).unwrap());
        let mut session = fx.session();

        session.create(&rel(16500), Fork::Main, Some(loc(ORDERS)), false);
        collector.collect_once();
        fx.clock.advance_secs(3600);
        session.create(&rel(16600), Fork::Main, Some(loc(16500)), false);
        collector.collect_once();

        let rows = collector.sink().read_lineage().unwrap();
        assert_eq!(rows.len(), 2);

        let chain = lineage_chain(&rows, loc(16600), Fork::Main);
        let olds: Vec<u32> = chain.iter().map(|r| r.old.file_number).collect();
        assert_eq!(olds, vec![16500, ORDERS]);
        assert!(lineage_chain(&rows, loc(16600), Fork::FreeSpace).is_empty());

        // Retention never touches lineage
        let mut sink = JsonlHistorySink::open(dir.path()).unwrap();
        sink.delete_older_than(Utc::now()).unwrap();
        assert_eq!(sink.read_lineage().unwrap().len(), 2);
    }
}

// ============================================================================
// End-to-end Tests
// ============================================================================

mod end_to_end_tests {
    use super::*;

    /// Insert `rows` rows: heap pages, free space map, visibility map, index
    fn bulk_load(fx: &Fixture, session: &mut Session, rows: u32) {
        let mut rng = rand::thread_rng();
        let rows_per_page = 50;
        for row in 0..rows {
            let page = row / rows_per_page;
            if row % rows_per_page == 0 {
                session.extend(&rel(ORDERS), Fork::Main, page);
            }
            session.record_write(&rel(ORDERS), Fork::Main, page, 1, Duration::from_micros(rng.gen_range(20..400)));
            session.record_write(&rel(ORDERS_PKEY), Fork::Main, rng.gen_range(0..64), 1, Duration::from_micros(rng.gen_range(10..90)));
            if row % rows_per_page == rows_per_page - 1 {
                session.record_write(&rel(ORDERS), Fork::FreeSpace, 0, 1, Duration::from_micros(15));
                session.record_write(&rel(ORDERS), Fork::Visibility, 0, 1, Duration::from_micros(12));
            }
            fx.clock.advance_us(rng.gen_range(50..500));
        }
    }

    #[test]
    fn test_bulk_load_history() {
        let dir = TempDir::new().unwrap();
        let fx = Fixture::new();
        let mut collector = fx.collector(JsonlHistorySink::open(dir.path()).unwrap());
        let mut session = fx.session();

        bulk_load(&fx, &mut session, 1000);
        session.close();
        let report = collector.collect_once();
        assert_eq!(report.rows, 4);

        let rows = collector.sink().read_history().unwrap();
        let mut keys: Vec<Key> = rows.iter().map(HistoryRow::key).collect();
        keys.sort_by_key(|k| (k.location.file_number, k.fork.as_i16()));
        keys.dedup();
        assert_eq!(keys.len(), rows.len(), "one row per relation and fork");

        for row in &rows {
            assert!(row.writes > 0);
            let hist = row.write_hist.as_ref().unwrap();
            assert_eq!(hist.len(), HIST_BINS);
            assert_eq!(hist.iter().sum::<u64>(), row.writes);
            assert!(row.write_min_us.unwrap() <= row.write_max_us.unwrap());
            if let Some(mean) = row.write_iat_mean_us {
                assert!(mean > 0.0);
            }
            assert!(row.name.is_some());
        }

        let heap = rows
            .iter()
            .find(|r| r.file_number == ORDERS && r.fork == Fork::Main)
            .unwrap();
        assert_eq!(heap.writes, 1000);
        assert_eq!(heap.extends, 20);
        // Only moving on to the next page continues a run
        assert_eq!(heap.sequential_writes, 19);
        assert_eq!(heap.random_writes, 981);
    }
}
