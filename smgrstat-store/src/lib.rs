//! # smgrstat Store
//!
//! Concurrent statistics core: per-file I/O aggregates shared between many
//! I/O-issuing sessions and one periodic collector.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Hot Path                              │
//! │                                                              │
//! │  Session ──> classifier ──> StatsStore (sharded locks)       │
//! │    │          (local)          │ new entry                   │
//! │    │                           ▼                             │
//! │    │                     pending metadata ──> safe point     │
//! │    └── rewrite ──> LineageQueue (bounded, lossy)             │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Collection Path                         │
//! │                                                              │
//! │  Collector ──> snapshot(reset) ──> resolve ──> HistorySink   │
//! │      │                                            ▲          │
//! │      └──────> drain lineage ──> resolve ──────────┘          │
//! │                                 retention sweep              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod clock;
pub mod collector;
pub mod context;
pub mod entry;
pub mod history;
pub mod lineage;
pub mod metadata;
pub mod region;
pub mod sequential;
pub mod session;
pub mod store;

pub use catalog::{Catalog, MemoryCatalog, RelationInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{current_rows, CollectionReport, Collector, CollectorHandle, CollectorSignal};
pub use context::{MayBlock, NoBlock};
pub use entry::Entry;
pub use history::{lineage_chain, HistoryBatch, HistoryRow, HistorySink, JsonlHistorySink, LineageRow, MemorySink};
pub use lineage::{LineageEvent, LineageQueue};
pub use metadata::{lookup_metadata, PendingMetadata, Resolution, ResolveStats};
pub use region::SharedRegion;
pub use sequential::{AccessTracker, SeqResult};
pub use session::{PendingRead, Relation, Session};
pub use store::{EntryGuard, Snapshot, StatsStore};
