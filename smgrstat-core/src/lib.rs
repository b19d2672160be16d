//! # smgrstat Core
//!
//! Building blocks for per-file storage I/O statistics:
//! - Keys and catalog identity types
//! - The 32-bin log2 timing histogram
//! - Streaming mean/variance accumulators
//! - Error types, configuration and self-metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  smgrstat-core                  │
//! ├─────────────────────────────────────────────────┤
//! │  • types      - Keys, forks, entry metadata     │
//! │  • histogram  - Log2 latency histogram codec    │
//! │  • welford    - Online mean / variance / CoV    │
//! │  • error      - Error handling                  │
//! │  • config     - Runtime settings                │
//! │  • metrics    - Subsystem self-metrics          │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod histogram;
pub mod metrics;
pub mod types;
pub mod welford;

// Re-export commonly used types
pub use config::{Config, SharedConfig, TempTracking};
pub use error::{Error, Result};
pub use histogram::{histogram_percentile, TimingHistogram, HIST_BINS};
pub use metrics::{Metrics, MetricsSnapshot};
pub use types::{
    BlockNumber, Direction, EntryMeta, Fork, Key, Oid, RelKind, StorageLocation, TimestampUs,
};
pub use welford::OnlineStats;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
