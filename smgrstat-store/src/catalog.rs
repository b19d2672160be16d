//! # Catalog Contract
//!
//! Identity lookups consumed by metadata resolution. Every method requires a
//! [`MayBlock`] token because a real catalog may block on I/O and locks.
//!
//! [`MemoryCatalog`] is a self-contained implementation used by the CLI
//! simulator and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use smgrstat_core::types::INVALID_OID;
use smgrstat_core::{Oid, RelKind};

use crate::context::MayBlock;

/// One catalog row describing a relation-like object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    pub relid: Oid,
    pub name: String,
    pub namespace: Oid,
    pub kind: RelKind,
    /// Zero for shared catalogs
    pub database: Oid,
    /// Zero means the database's default tablespace
    pub tablespace: Oid,
    pub file_number: Oid,
    /// Toast table owned by this relation
    pub toast_relid: Option<Oid>,
    /// Table an index is defined on
    pub indexed_relid: Option<Oid>,
}

/// Read-only catalog access for one database connection
pub trait Catalog: Send + Sync {
    /// Database this catalog view serves; shared objects are also visible
    fn database(&self) -> Oid;

    /// False while the catalog cannot be queried yet (early startup)
    fn is_available(&self) -> bool {
        true
    }

    /// Logical id of the relation currently stored under a file number
    fn relid_by_file_number(&self, tablespace: Oid, file_number: Oid, cx: &MayBlock) -> Option<Oid>;

    fn relation(&self, relid: Oid, cx: &MayBlock) -> Option<RelationInfo>;

    fn namespace_name(&self, namespace: Oid, cx: &MayBlock) -> Option<String>;

    /// Table owning a toast relation
    fn toast_owner(&self, toast_relid: Oid, cx: &MayBlock) -> Option<Oid>;

    /// Table an index is defined on
    fn indexed_relation(&self, index_relid: Oid, cx: &MayBlock) -> Option<Oid>;

    /// Every relation of a database, used after the database is created
    fn relations_in_database(&self, _database: Oid, _cx: &MayBlock) -> Vec<RelationInfo> {
        Vec::new()
    }
}

#[derive(Default)]
struct CatalogTables {
    namespaces: HashMap<Oid, String>,
    relations: HashMap<Oid, RelationInfo>,
}

/// In-memory catalog
pub struct MemoryCatalog {
    database: Oid,
    tables: RwLock<CatalogTables>,
    available: AtomicBool,
    lookups: AtomicU64,
}

impl MemoryCatalog {
    pub fn new(database: Oid) -> Self {
        Self {
            database,
            tables: RwLock::new(CatalogTables::default()),
            available: AtomicBool::new(true),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn add_namespace(&self, oid: Oid, name: impl Into<String>) {
        self.tables.write().namespaces.insert(oid, name.into());
    }

    pub fn add_relation(&self, relation: RelationInfo) {
        self.tables.write().relations.insert(relation.relid, relation);
    }

    pub fn remove_relation(&self, relid: Oid) -> Option<RelationInfo> {
        self.tables.write().relations.remove(&relid)
    }

    /// Give a relation a new file number, returning the previous one
    pub fn rewrite(&self, relid: Oid, new_file_number: Oid) -> Option<Oid> {
        let mut tables = self.tables.write();
        let relation = tables.relations.get_mut(&relid)?;
        Some(std::mem::replace(&mut relation.file_number, new_file_number))
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of relation lookups served
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    fn visible(&self, relation: &RelationInfo) -> bool {
        relation.database == self.database || relation.database == INVALID_OID
    }
}

impl Catalog for MemoryCatalog {
    fn database(&self) -> Oid {
        self.database
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn relid_by_file_number(&self, tablespace: Oid, file_number: Oid, _cx: &MayBlock) -> Option<Oid> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.tables
            .read()
            .relations
            .values()
            .find(|r| self.visible(r) && r.tablespace == tablespace && r.file_number == file_number)
            .map(|r| r.relid)
    }

    fn relation(&self, relid: Oid, _cx: &MayBlock) -> Option<RelationInfo> {
        self.tables
            .read()
            .relations
            .get(&relid)
            .filter(|r| self.visible(r))
            .cloned()
    }

    fn namespace_name(&self, namespace: Oid, _cx: &MayBlock) -> Option<String> {
        self.tables.read().namespaces.get(&namespace).cloned()
    }

    fn toast_owner(&self, toast_relid: Oid, _cx: &MayBlock) -> Option<Oid> {
        self.tables
            .read()
            .relations
            .values()
            .find(|r| r.toast_relid == Some(toast_relid))
            .map(|r| r.relid)
    }

    fn indexed_relation(&self, index_relid: Oid, _cx: &MayBlock) -> Option<Oid> {
        self.tables
            .read()
            .relations
            .get(&index_relid)
            .and_then(|r| r.indexed_relid)
    }

    fn relations_in_database(&self, database: Oid, _cx: &MayBlock) -> Vec<RelationInfo> {
        let mut relations: Vec<_> = self
            .tables
            .read()
            .relations
            .values()
            .filter(|r| r.database == database)
            .cloned()
            .collect();
        relations.sort_by_key(|r| r.relid);
        relations
    }
}
