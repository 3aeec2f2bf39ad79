//! In-process flag store.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::store::{FlagChange, FlagStore, FlagWrite, SharedFlagStore, StoreError, StoreResult};
use crate::audit::{AuditLog, AuditLogEntry, AuditQuery};
use crate::context::ContextRef;
use crate::flag::{FlagKey, FlagRecord};

/// Serializable copy of a [`MemoryFlagStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub records: Vec<FlagRecord>,
    #[serde(default)]
    pub audit: Vec<AuditLogEntry>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<FlagKey, FlagRecord>,
    audit: Vec<AuditLogEntry>,
}

/// `RwLock`-guarded record map and audit vector. Every operation takes the
/// lock once, so chain reads are consistent and commits are atomic.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    inner: RwLock<Inner>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a snapshot. Duplicate keys or global-default records
    /// make the snapshot invalid.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> StoreResult<Self> {
        let mut records = BTreeMap::new();
        for record in snapshot.records {
            let key = record
                .key()
                .ok_or_else(|| StoreError::GlobalDefault(record.feature.clone()))?;
            if records.contains_key(&key) {
                return Err(StoreError::UniqueViolation(key));
            }
            records.insert(key, record);
        }

        Ok(Self {
            inner: RwLock::new(Inner {
                records,
                audit: snapshot.audit,
            }),
        })
    }

    /// Copy out every record and audit entry.
    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(StoreSnapshot {
            records: inner.records.values().cloned().collect(),
            audit: inner.audit.clone(),
        })
    }

    pub fn shared(self) -> SharedFlagStore {
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemoryFlagStore {
    fn entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(query.apply(&inner.audit))
    }
}

impl FlagStore for MemoryFlagStore {
    fn find(&self, feature: &str, context: &ContextRef) -> StoreResult<Option<FlagRecord>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.records.get(&FlagKey::new(feature, context)).cloned())
    }

    fn snapshot_chain(&self, feature: &str, chain: &[ContextRef]) -> StoreResult<Vec<FlagRecord>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(chain
            .iter()
            .filter_map(|ctx| inner.records.get(&FlagKey::new(feature, ctx)).cloned())
            .collect())
    }

    fn commit(&self, change: FlagChange) -> StoreResult<Option<FlagRecord>> {
        let key = change.write.key()?;
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;

        let previous = match change.write {
            FlagWrite::Insert(record) => {
                if inner.records.contains_key(&key) {
                    return Err(StoreError::UniqueViolation(key));
                }
                inner.records.insert(key, record);
                None
            }
            FlagWrite::Update(record) => {
                let slot = inner
                    .records
                    .get_mut(&key)
                    .ok_or_else(|| StoreError::NotFound(key.clone()))?;
                Some(std::mem::replace(slot, record))
            }
            FlagWrite::Delete(_) => Some(
                inner
                    .records
                    .remove(&key)
                    .ok_or_else(|| StoreError::NotFound(key.clone()))?,
            ),
        };

        inner.audit.push(change.audit);
        Ok(previous)
    }

    fn records_for_feature(&self, feature: &str) -> StoreResult<Vec<FlagRecord>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.feature == feature)
            .cloned()
            .collect())
    }
}
