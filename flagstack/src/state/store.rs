//! Store trait and write model shared by every backend.

use std::sync::Arc;

use crate::audit::{AuditLog, AuditLogEntry};
use crate::context::ContextRef;
use crate::flag::{FlagKey, FlagRecord};

/// Error type for flag store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "rocksdb-store")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Insert raced with another insert at the same key.
    #[error("Record already exists: {0}")]
    UniqueViolation(FlagKey),

    /// Update or delete of a record that is gone.
    #[error("Record not found: {0}")]
    NotFound(FlagKey),

    #[error("Cannot persist the global default of '{0}'")]
    GlobalDefault(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for flag store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a flag store
pub type SharedFlagStore = Arc<dyn FlagStore>;

/// One record write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagWrite {
    /// Create; fails with [`StoreError::UniqueViolation`] if the key exists.
    Insert(FlagRecord),
    /// Replace; fails with [`StoreError::NotFound`] if the key is absent.
    Update(FlagRecord),
    /// Remove; fails with [`StoreError::NotFound`] if the key is absent.
    Delete(FlagKey),
}

impl FlagWrite {
    /// Key the write targets.
    pub fn key(&self) -> StoreResult<FlagKey> {
        match self {
            Self::Insert(record) | Self::Update(record) => record
                .key()
                .ok_or_else(|| StoreError::GlobalDefault(record.feature.clone())),
            Self::Delete(key) => Ok(key.clone()),
        }
    }
}

/// A record write plus the audit entry describing it, committed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    pub write: FlagWrite,
    pub audit: AuditLogEntry,
}

impl FlagChange {
    pub fn new(write: FlagWrite, audit: AuditLogEntry) -> Self {
        Self { write, audit }
    }
}

/// Persisted flag overrides.
///
/// Implementations must make [`commit`](Self::commit) atomic (record and
/// audit entry land together or not at all) and must enforce at most one
/// record per [`FlagKey`].
pub trait FlagStore: AuditLog {
    /// Record at exactly `context`, if any.
    fn find(&self, feature: &str, context: &ContextRef) -> StoreResult<Option<FlagRecord>>;

    /// Every record of `feature` on `chain`, read from one consistent view
    /// and returned in chain order (most specific first).
    fn snapshot_chain(&self, feature: &str, chain: &[ContextRef]) -> StoreResult<Vec<FlagRecord>>;

    /// Apply one write and append its audit entry atomically. Returns the
    /// record that was replaced or removed.
    fn commit(&self, change: FlagChange) -> StoreResult<Option<FlagRecord>>;

    /// All records of `feature`, ordered by key.
    fn records_for_feature(&self, feature: &str) -> StoreResult<Vec<FlagRecord>>;
}
