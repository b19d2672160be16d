//! # smgrstat CLI
//!
//! Operator tool for per-file storage I/O statistics: evaluate histogram
//! percentiles, inspect a history directory, follow file lineage, and run a
//! synthetic workload against the full collection pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::{info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use smgrstat_core::config::{LogFormat, LogLevel};
use smgrstat_core::{histogram_percentile, Config, Fork, RelKind, SharedConfig, StorageLocation, TempTracking};
use smgrstat_store::{
    lineage_chain, Catalog, Collector, HistoryRow, JsonlHistorySink, MemoryCatalog, NoBlock, Relation, RelationInfo,
    Session, SharedRegion, SystemClock,
};

#[derive(Parser)]
#[command(name = "smgrstat")]
#[command(about = "Per-file storage I/O statistics")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Approximate percentile of a 32-bin latency histogram
    Percentile {
        /// Comma-separated bin counts
        #[arg(long, value_delimiter = ',')]
        bins: Vec<u64>,
        /// Fraction between 0.0 and 1.0
        #[arg(long)]
        p: f64,
    },
    /// Print collected history rows
    History {
        /// History directory
        #[arg(long)]
        dir: PathBuf,
        /// Only rows collected in the last N hours
        #[arg(long)]
        since_hours: Option<i64>,
        /// Print full rows as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Follow the file lineage of a storage location backwards
    Lineage {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = 1663)]
        tablespace: u32,
        #[arg(long)]
        database: u32,
        #[arg(long)]
        file_number: u32,
    },
    /// Run a synthetic workload through sessions and a collector
    Simulate {
        /// History directory to write into
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = 4)]
        sessions: usize,
        /// Operations per session
        #[arg(long, default_value_t = 5000)]
        ops: usize,
        /// Override the temp tracking mode
        #[arg(long)]
        temp_tables: Option<TempTracking>,
    },
}

fn init_logging(config: &Config) {
    let level = match config.logging.level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));
    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    init_logging(&config);

    match cli.command {
        Commands::Percentile { bins, p } => {
            match histogram_percentile(&bins, p)? {
                Some(value) => println!("{}", value),
                None => println!("(empty histogram)"),
            }
        }
        Commands::History { dir, since_hours, json } => print_history(dir, since_hours, json)?,
        Commands::Lineage {
            dir,
            tablespace,
            database,
            file_number,
        } => print_lineage(dir, StorageLocation::new(tablespace, database, file_number))?,
        Commands::Simulate {
            dir,
            sessions,
            ops,
            temp_tables,
        } => {
            let mut config = config;
            if let Some(mode) = temp_tables {
                config.tracking.track_temp_tables = mode;
            }
            simulate(config, dir, sessions, ops)?;
        }
    }

    Ok(())
}

fn latency(hist: &Option<Vec<u64>>, p: f64) -> String {
    match hist {
        Some(bins) => match histogram_percentile(bins, p) {
            Ok(Some(value)) => format!("{}", value),
            _ => "-".to_string(),
        },
        None => "-".to_string(),
    }
}

/// Start of the `--since-hours` window
fn history_cutoff(now: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>> {
    chrono::Duration::try_hours(hours)
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("--since-hours {} is out of range", hours))
}

fn print_history(dir: PathBuf, since_hours: Option<i64>, json: bool) -> Result<()> {
    let sink = JsonlHistorySink::open(&dir)?;
    let rows: Vec<HistoryRow> = match since_hours {
        Some(hours) => sink.read_history_since(history_cutoff(Utc::now(), hours)?)?,
        None => sink.read_history()?,
    };

    if json {
        for row in &rows {
            println!("{}", serde_json::to_string(row)?);
        }
        return Ok(());
    }

    println!(
        "{:>6}  {:<22} {:<5} {:<28} {:>8} {:>8} {:>8} {:>9} {:>9}",
        "bucket", "location", "fork", "relation", "reads", "writes", "extends", "rd_p50us", "wr_p99us"
    );
    for row in &rows {
        let relation = match (&row.namespace, &row.name) {
            (Some(nsp), Some(name)) => format!("{}.{}", nsp, name),
            (None, Some(name)) => name.clone(),
            _ => "?".to_string(),
        };
        println!(
            "{:>6}  {:<22} {:<5} {:<28} {:>8} {:>8} {:>8} {:>9} {:>9}",
            row.bucket_id,
            row.key().location.to_string(),
            row.fork.name(),
            relation,
            row.reads,
            row.writes,
            row.extends,
            latency(&row.read_hist, 0.5),
            latency(&row.write_hist, 0.99),
        );
    }
    println!("{} rows", rows.len());
    Ok(())
}

fn print_lineage(dir: PathBuf, location: StorageLocation) -> Result<()> {
    let sink = JsonlHistorySink::open(&dir)?;
    let rows = sink.read_lineage()?;
    let chain = lineage_chain(&rows, location, Fork::Main);
    if chain.is_empty() {
        println!("{} has no recorded predecessors", location);
        return Ok(());
    }
    println!("{}", location);
    for row in chain {
        let name = row.name.as_deref().unwrap_or("?");
        println!(
            "  <- {}  ({} at {}{})",
            row.old,
            name,
            row.recorded_at.to_rfc3339(),
            if row.is_replay { ", replay" } else { "" }
        );
    }
    Ok(())
}

const SIM_DATABASE: u32 = 5;
const SIM_TABLESPACE: u32 = 1663;
const SIM_NAMESPACE: u32 = 2200;

/// Catalog with a handful of tables, one index and one toast table each
fn simulation_catalog(tables: u32) -> Arc<MemoryCatalog> {
    let catalog = Arc::new(MemoryCatalog::new(SIM_DATABASE));
    catalog.add_namespace(SIM_NAMESPACE, "public");
    catalog.add_namespace(99, "pg_toast");
    for i in 0..tables {
        let table = 16384 + i * 3;
        let toast = table + 1;
        let index = table + 2;
        catalog.add_relation(RelationInfo {
            relid: table,
            name: format!("bench_{}", i),
            namespace: SIM_NAMESPACE,
            kind: RelKind::Table,
            database: SIM_DATABASE,
            tablespace: 0,
            file_number: table,
            toast_relid: Some(toast),
            indexed_relid: None,
        });
        catalog.add_relation(RelationInfo {
            relid: toast,
            name: format!("pg_toast_{}", table),
            namespace: 99,
            kind: RelKind::Toast,
            database: SIM_DATABASE,
            tablespace: 0,
            file_number: toast,
            toast_relid: None,
            indexed_relid: None,
        });
        catalog.add_relation(RelationInfo {
            relid: index,
            name: format!("bench_{}_pkey", i),
            namespace: SIM_NAMESPACE,
            kind: RelKind::Index,
            database: SIM_DATABASE,
            tablespace: 0,
            file_number: index,
            toast_relid: None,
            indexed_relid: Some(table),
        });
    }
    catalog
}

fn simulate(config: Config, dir: PathBuf, sessions: usize, ops: usize) -> Result<()> {
    config.validate()?;
    let shared = SharedConfig::new(config.clone());
    let region = SharedRegion::attach("simulate", &config);
    let catalog = simulation_catalog(4);
    let clock = Arc::new(SystemClock);

    let sink = JsonlHistorySink::open(&dir)?;
    let collector = Collector::new(
        Arc::clone(&region),
        catalog.clone() as Arc<dyn Catalog>,
        shared.clone(),
        clock.clone(),
        sink,
    )
    .spawn()?;

    info!(sessions, ops, dir = %dir.display(), "Starting simulated workload");

    let workers: Vec<_> = (0..sessions)
        .map(|worker| {
            let mut session = Session::new(
                Arc::clone(&region),
                catalog.clone() as Arc<dyn Catalog>,
                shared.clone(),
                clock.clone(),
            );
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let table = 16384 + (worker as u32 % 4) * 3;
                let rel = Relation::new(StorageLocation::new(SIM_TABLESPACE, SIM_DATABASE, table));
                let index = Relation::new(StorageLocation::new(SIM_TABLESPACE, SIM_DATABASE, table + 2));
                let temp = Relation::temporary(StorageLocation::new(SIM_TABLESPACE, SIM_DATABASE, 900_000 + worker as u32));
                session.open(&rel);

                let mut next_block = 0u32;
                for op in 0..ops {
                    match rng.gen_range(0..10) {
                        0..=4 => {
                            session.record_read(&rel, Fork::Main, next_block, 1, Duration::from_micros(rng.gen_range(5..400)));
                            next_block += 1;
                        }
                        5 => {
                            let block = rng.gen_range(0..1000);
                            session.record_read(&index, Fork::Main, block, 1, Duration::from_micros(rng.gen_range(5..50)));
                        }
                        6 | 7 => {
                            session.record_write(&rel, Fork::Main, rng.gen_range(0..1000), 1, Duration::from_micros(rng.gen_range(10..900)));
                        }
                        8 => session.record_write(&temp, Fork::Main, op as u32, 1, Duration::from_micros(3)),
                        _ => {
                            // async read of the index, completed right away
                            if let Some(read) = session.start_read(&index, Fork::Main, rng.gen_range(0..1000), 1) {
                                read.complete(&NoBlock::completion());
                            }
                        }
                    }
                    if op % 500 == 0 {
                        session.resolve_pending_metadata();
                    }
                }
                session.extend(&rel, Fork::Main, next_block);
                session.sync(&rel, Fork::Main);
                session.close();
            })
        })
        .collect();

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("simulated session panicked"))?;
    }

    // One rewrite so the lineage file has something in it
    let old = StorageLocation::new(SIM_TABLESPACE, SIM_DATABASE, 16384);
    let new_file_number = 70_000;
    catalog.rewrite(16384, new_file_number);
    let mut session = Session::new(
        Arc::clone(&region),
        catalog.clone() as Arc<dyn Catalog>,
        shared.clone(),
        clock.clone(),
    );
    let rewritten = Relation::new(StorageLocation::new(SIM_TABLESPACE, SIM_DATABASE, new_file_number));
    session.create(&rewritten, Fork::Main, Some(old), false);
    session.record_write(&rewritten, Fork::Main, 0, 8, Duration::from_micros(120));
    session.close();

    let sink = collector.shutdown()?;
    let stats = region.metrics().snapshot();
    SharedRegion::detach("simulate");

    println!("history directory:   {}", sink.base_dir().display());
    println!("entries created:     {}", stats.entries_created);
    println!("operations recorded: {}", stats.operations_recorded);
    println!("metadata resolved:   {}", stats.metadata_resolved);
    println!("collections:         {}", stats.collections);
    println!("rows collected:      {}", stats.rows_collected);
    println!("lineage rows:        {}", stats.lineage_rows_collected);
    println!("lineage dropped:     {}", stats.lineage_dropped);
    println!("sink failures:       {}", stats.sink_failures);
    Ok(())
}
