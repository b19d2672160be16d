//! # Shared Region
//!
//! Named container for everything sessions and the collector share: the
//! keyed store, the lineage queue and the self-metrics.
//!
//! Regions are obtained by name. The first attacher creates the region with
//! its settings; later attachers get the same instance and their settings
//! are ignored.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info};

use smgrstat_core::{Config, Metrics};

use crate::lineage::LineageQueue;
use crate::store::StatsStore;

static REGIONS: OnceLock<Mutex<HashMap<String, Arc<SharedRegion>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<SharedRegion>>> {
    REGIONS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// State shared by all sessions and the collector
pub struct SharedRegion {
    name: String,
    store: StatsStore,
    lineage: LineageQueue,
    metrics: Metrics,
}

impl SharedRegion {
    /// Build a region outside the registry
    pub fn new(name: impl Into<String>, config: &Config) -> Self {
        let metrics = Metrics::new();
        Self {
            name: name.into(),
            store: StatsStore::with_shards(config.tracking.store_shards, metrics.clone()),
            lineage: LineageQueue::new(config.lineage.queue_capacity, metrics.clone()),
            metrics,
        }
    }

    /// Attach to the region called `name`, creating it on first use
    pub fn attach(name: &str, config: &Config) -> Arc<SharedRegion> {
        let mut regions = registry().lock();
        if let Some(region) = regions.get(name) {
            debug!(region = name, "Attached to existing region");
            return Arc::clone(region);
        }

        let region = Arc::new(SharedRegion::new(name, config));
        info!(
            region = name,
            shards = config.tracking.store_shards,
            lineage_capacity = region.lineage.capacity(),
            "Created statistics region"
        );
        regions.insert(name.to_string(), Arc::clone(&region));
        region
    }

    /// Remove a region from the registry; existing handles stay usable
    pub fn detach(name: &str) -> Option<Arc<SharedRegion>> {
        registry().lock().remove(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &StatsStore {
        &self.store
    }

    pub fn lineage(&self) -> &LineageQueue {
        &self.lineage
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
