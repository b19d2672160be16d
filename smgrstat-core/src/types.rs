//! # Core Types
//!
//! Keys and identity metadata shared by every layer of the statistics
//! subsystem.
//!
//! ## Key Anatomy
//!
//! ```text
//! ┌───────────────────────── Key ─────────────────────────┐
//! │  StorageLocation                          │   Fork    │
//! │  tablespace │ database │ file_number      │ main/fsm/ │
//! │  (oid)      │ (oid)    │ (oid, reused     │ vm/init   │
//! │             │          │  after rewrite)  │           │
//! └───────────────────────────────────────────┴───────────┘
//! ```
//!
//! A key names one physical fork of one relation-like object at a point in
//! time. File numbers are reused once a relation is rewritten, which is what
//! the lineage queue exists to track.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object identifier as handed out by the catalog. Zero means "invalid".
pub type Oid = u32;

/// Block number within a fork
pub type BlockNumber = u32;

/// Microseconds since the Unix epoch; zero is the "never" sentinel
pub type TimestampUs = i64;

/// The invalid object identifier
pub const INVALID_OID: Oid = 0;

/// File number reserved for the per-database temporary-object aggregate
pub const TEMP_AGGREGATE_FILE_NUMBER: Oid = u32::MAX;

/// Name reported for the temporary-object aggregate
pub const TEMP_AGGREGATE_NAME: &str = "<temporary tables>";

/// Namespace reported for the temporary-object aggregate
pub const TEMP_AGGREGATE_NAMESPACE: &str = "pg_temp";

/// Physical location of a relation's files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageLocation {
    pub tablespace: Oid,
    pub database: Oid,
    pub file_number: Oid,
}

impl StorageLocation {
    pub const fn new(tablespace: Oid, database: Oid, file_number: Oid) -> Self {
        Self {
            tablespace,
            database,
            file_number,
        }
    }

    /// Objects shared across databases live under database zero
    pub fn is_shared(&self) -> bool {
        self.database == INVALID_OID
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tablespace, self.database, self.file_number)
    }
}

/// Physical fork of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fork {
    Main,
    FreeSpace,
    Visibility,
    Init,
}

impl Fork {
    /// All forks in on-disk numbering order
    pub const ALL: [Fork; 4] = [Fork::Main, Fork::FreeSpace, Fork::Visibility, Fork::Init];

    pub fn as_i16(&self) -> i16 {
        match self {
            Fork::Main => 0,
            Fork::FreeSpace => 1,
            Fork::Visibility => 2,
            Fork::Init => 3,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Fork::Main),
            1 => Some(Fork::FreeSpace),
            2 => Some(Fork::Visibility),
            3 => Some(Fork::Init),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Fork::Main => "main",
            Fork::FreeSpace => "fsm",
            Fork::Visibility => "vm",
            Fork::Init => "init",
        }
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Store key: one fork of one storage location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub location: StorageLocation,
    pub fork: Fork,
}

impl Key {
    pub const fn new(location: StorageLocation, fork: Fork) -> Self {
        Self { location, fork }
    }

    /// Synthetic key that absorbs all temporary-object I/O of a database
    pub const fn temp_aggregate(database: Oid) -> Self {
        Self {
            location: StorageLocation::new(INVALID_OID, database, TEMP_AGGREGATE_FILE_NUMBER),
            fork: Fork::Main,
        }
    }

    pub fn is_temp_aggregate(&self) -> bool {
        *self == Self::temp_aggregate(self.location.database)
    }

    /// Same location, different fork
    pub fn with_fork(&self, fork: Fork) -> Self {
        Self {
            location: self.location,
            fork,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location, self.fork)
    }
}

/// Read or write side of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Kind of catalog object a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelKind {
    Table,
    Index,
    Sequence,
    Toast,
    View,
    MaterializedView,
    CompositeType,
    ForeignTable,
    PartitionedTable,
    PartitionedIndex,
    /// Synthetic kind of the temporary-object aggregate
    TempAggregate,
}

impl RelKind {
    /// Single-character catalog code
    pub fn as_char(&self) -> char {
        match self {
            RelKind::Table => 'r',
            RelKind::Index => 'i',
            RelKind::Sequence => 'S',
            RelKind::Toast => 't',
            RelKind::View => 'v',
            RelKind::MaterializedView => 'm',
            RelKind::CompositeType => 'c',
            RelKind::ForeignTable => 'f',
            RelKind::PartitionedTable => 'p',
            RelKind::PartitionedIndex => 'I',
            RelKind::TempAggregate => 'T',
        }
    }

    pub fn from_char(code: char) -> Option<Self> {
        Some(match code {
            'r' => RelKind::Table,
            'i' => RelKind::Index,
            'S' => RelKind::Sequence,
            't' => RelKind::Toast,
            'v' => RelKind::View,
            'm' => RelKind::MaterializedView,
            'c' => RelKind::CompositeType,
            'f' => RelKind::ForeignTable,
            'p' => RelKind::PartitionedTable,
            'I' => RelKind::PartitionedIndex,
            'T' => RelKind::TempAggregate,
            _ => return None,
        })
    }

    /// Indexes report the table they index as their parent
    pub fn is_index(&self) -> bool {
        matches!(self, RelKind::Index | RelKind::PartitionedIndex)
    }
}

/// Catalog-derived identity of an entry
///
/// Populated asynchronously after the entry is created. Once `valid` is set
/// the value is frozen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Stable logical identifier, survives rewrites
    pub relid: Option<Oid>,
    /// Owning table for toast relations, indexed table for indexes
    pub parent_relid: Option<Oid>,
    pub kind: Option<RelKind>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub valid: bool,
}

impl EntryMeta {
    /// Identity of the temporary-object aggregate, known without a lookup
    pub fn temp_aggregate() -> Self {
        Self {
            relid: None,
            parent_relid: None,
            kind: Some(RelKind::TempAggregate),
            name: Some(TEMP_AGGREGATE_NAME.to_string()),
            namespace: Some(TEMP_AGGREGATE_NAMESPACE.to_string()),
            valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_numbering() {
        for fork in Fork::ALL {
            assert_eq!(Fork::from_i16(fork.as_i16()), Some(fork));
        }
        assert_eq!(Fork::from_i16(4), None);
    }

    #[test]
    fn test_relkind_codes() {
        for code in ['r', 'i', 'S', 't', 'v', 'm', 'c', 'f', 'p', 'I', 'T'] {
            assert_eq!(RelKind::from_char(code).map(|k| k.as_char()), Some(code));
        }
        assert!(RelKind::from_char('x').is_none());
    }

    #[test]
    fn test_temp_aggregate_key() {
        let key = Key::temp_aggregate(5);
        assert!(key.is_temp_aggregate());
        assert_eq!(key.location.database, 5);
        assert_eq!(key.location.tablespace, 0);
        assert_eq!(key.fork, Fork::Main);
        assert_eq!(key.to_string(), format!("0/5/{}:main", u32::MAX));
    }

    #[test]
    fn test_real_key_with_max_file_number() {
        let on_disk = Key::new(StorageLocation::new(1663, 5, u32::MAX), Fork::Main);
        assert!(!on_disk.is_temp_aggregate());
        assert!(!Key::temp_aggregate(5).with_fork(Fork::FreeSpace).is_temp_aggregate());
    }
}
