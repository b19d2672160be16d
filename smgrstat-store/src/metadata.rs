//! # Deferred Metadata Resolution
//!
//! Entries are created on the I/O path, where catalog access is forbidden.
//! Their identity is attached later, at safe points, without ever holding a
//! store guard across a lookup.
//!
//! ## Release / Lookup / Reacquire
//!
//! ```text
//!  phase 1   find(key) ── valid? ──yes──> done (AlreadyValid)
//!               │ no
//!            release guard
//!  phase 2   lookup_metadata(catalog)     no guard held
//!               │ none ─────────────────> retry later (Unresolved)
//!  phase 3   find(key) ── gone? ────────> drop result (Evicted)
//!               ├─ valid now? ──────────> drop result (LostRace)
//!               └─ apply, release ──────> Applied
//! ```
//!
//! Two sessions resolving the same key both look it up; whichever reacquires
//! first applies its result and the other observes `valid` and backs off.

use tracing::debug;

use smgrstat_core::types::INVALID_OID;
use smgrstat_core::{EntryMeta, Fork, Key, Oid, RelKind, StorageLocation};

use crate::catalog::{Catalog, RelationInfo};
use crate::context::MayBlock;
use crate::entry::Entry;
use crate::store::StatsStore;

/// Outcome of resolving one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Metadata was already valid, no lookup performed
    AlreadyValid,
    /// Lookup succeeded and was applied
    Applied,
    /// Lookup found nothing; the entry stays invalid
    Unresolved,
    /// Another resolver applied metadata while we were looking it up
    LostRace,
    /// The entry no longer exists
    Evicted,
}

/// Tally of a batch resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub applied: usize,
    pub already_valid: usize,
    pub unresolved: usize,
    pub raced: usize,
}

impl ResolveStats {
    fn add(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Applied => self.applied += 1,
            Resolution::AlreadyValid => self.already_valid += 1,
            Resolution::Unresolved => self.unresolved += 1,
            Resolution::LostRace | Resolution::Evicted => self.raced += 1,
        }
    }
}

/// Look up the identity of a key
///
/// Must run with no store guard held. Returns `None` when the catalog is
/// unavailable or knows nothing about the file.
pub fn lookup_metadata(catalog: &dyn Catalog, key: &Key, cx: &MayBlock) -> Option<EntryMeta> {
    if key.is_temp_aggregate() {
        return Some(EntryMeta::temp_aggregate());
    }
    let location = key.location;
    if location.file_number == INVALID_OID || !catalog.is_available() {
        return None;
    }

    // Relations in the default tablespace are cataloged under tablespace 0
    let relid = catalog
        .relid_by_file_number(location.tablespace, location.file_number, cx)
        .or_else(|| {
            (location.tablespace != INVALID_OID)
                .then(|| catalog.relid_by_file_number(INVALID_OID, location.file_number, cx))
                .flatten()
        })?;

    let relation = catalog.relation(relid, cx)?;
    Some(metadata_for_relation(catalog, &relation, cx))
}

fn metadata_for_relation(catalog: &dyn Catalog, relation: &RelationInfo, cx: &MayBlock) -> EntryMeta {
    let parent_relid = match relation.kind {
        RelKind::Toast => catalog.toast_owner(relation.relid, cx),
        kind if kind.is_index() => relation
            .indexed_relid
            .or_else(|| catalog.indexed_relation(relation.relid, cx)),
        _ => None,
    };

    EntryMeta {
        relid: Some(relation.relid),
        parent_relid,
        kind: Some(relation.kind),
        name: Some(relation.name.clone()),
        namespace: catalog.namespace_name(relation.namespace, cx),
        valid: true,
    }
}

/// Resolve one key with the three-phase protocol
pub fn resolve_entry(store: &StatsStore, catalog: &dyn Catalog, key: &Key, cx: &MayBlock) -> Resolution {
    // Phase 1: check under the guard, then let it go
    let already_valid = match store.find(key) {
        Some(entry) => entry.meta.valid,
        None => return Resolution::Evicted,
    };
    if already_valid {
        return Resolution::AlreadyValid;
    }

    // Phase 2: lookup with nothing held
    let Some(meta) = lookup_metadata(catalog, key, cx) else {
        store.metrics().record_metadata_unresolved();
        return Resolution::Unresolved;
    };

    // Phase 3: reacquire and apply only if nobody beat us to it
    let resolution = apply_if_invalid(store, key, &meta);
    match resolution {
        Resolution::Applied => store.metrics().record_metadata_resolved(),
        _ => store.metrics().record_metadata_race(),
    }
    resolution
}

fn apply_if_invalid(store: &StatsStore, key: &Key, meta: &EntryMeta) -> Resolution {
    let Some(mut entry) = store.find(key) else {
        return Resolution::Evicted;
    };
    if entry.meta.valid {
        return Resolution::LostRace;
    }
    entry.meta = meta.clone();
    Resolution::Applied
}

/// Keys a session created and still has to resolve
#[derive(Debug, Clone)]
pub struct PendingMetadata {
    database: Oid,
    keys: Vec<Key>,
}

impl PendingMetadata {
    /// Pending list for a session connected to `database`
    pub fn new(database: Oid) -> Self {
        Self {
            database,
            keys: Vec::new(),
        }
    }

    /// Queue a newly created key
    ///
    /// Only keys this session can look up are kept: its own database and
    /// shared objects. The temp aggregate never needs a lookup.
    pub fn add(&mut self, key: Key) -> bool {
        if key.is_temp_aggregate() {
            return false;
        }
        let database = key.location.database;
        if database != self.database && database != INVALID_OID {
            return false;
        }
        self.keys.push(key);
        true
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Drain the list, resolving each key
    ///
    /// Unresolved keys are not retried by this session; the collector picks
    /// them up from its snapshot.
    pub fn resolve(&mut self, store: &StatsStore, catalog: &dyn Catalog, cx: &MayBlock) -> ResolveStats {
        let mut stats = ResolveStats::default();
        for key in self.keys.drain(..) {
            stats.add(resolve_entry(store, catalog, &key, cx));
        }
        if stats != ResolveStats::default() {
            debug!(
                applied = stats.applied,
                unresolved = stats.unresolved,
                raced = stats.raced,
                "Resolved pending metadata"
            );
        }
        stats
    }
}

/// Resolve metadata on detached snapshot copies
///
/// Only entries of the catalog's database or shared ones are attempted.
/// Returns the number of copies that gained valid metadata.
pub fn resolve_snapshot(entries: &mut [Entry], catalog: &dyn Catalog, cx: &MayBlock) -> usize {
    let database = catalog.database();
    let mut resolved = 0;
    for entry in entries.iter_mut().filter(|e| !e.meta.valid) {
        let entry_db = entry.key.location.database;
        if entry_db != database && entry_db != INVALID_OID {
            continue;
        }
        if let Some(meta) = lookup_metadata(catalog, &entry.key, cx) {
            entry.meta = meta;
            resolved += 1;
        }
    }
    resolved
}

/// Resolve entries belonging to a freshly created database
///
/// Files copied while creating a database are written by a session connected
/// elsewhere, so nobody queued them. Walk the new database's relations and
/// resolve each main fork, propagating the result to its other forks.
pub fn resolve_database(
    store: &StatsStore,
    catalog: &dyn Catalog,
    database: Oid,
    default_tablespace: Oid,
    cx: &MayBlock,
) -> usize {
    let mut applied = 0;
    for relation in catalog.relations_in_database(database, cx) {
        let tablespace = if relation.tablespace == INVALID_OID {
            default_tablespace
        } else {
            relation.tablespace
        };
        let location = StorageLocation::new(tablespace, database, relation.file_number);
        let main = Key::new(location, Fork::Main);

        let needs_lookup = match store.find(&main) {
            Some(entry) => !entry.meta.valid,
            None => false,
        };
        if !needs_lookup {
            continue;
        }

        let meta = metadata_for_relation(catalog, &relation, cx);
        for fork in Fork::ALL {
            if apply_if_invalid(store, &main.with_fork(fork), &meta) == Resolution::Applied {
                applied += 1;
            }
        }
    }
    if applied > 0 {
        debug!(database, applied, "Resolved metadata for new database");
    }
    applied
}
