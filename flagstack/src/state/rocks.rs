//! RocksDB-backed flag store
//!
//! Values are JSON so a database can be inspected with `ldb` and read by
//! other tooling. Chain reads go through a RocksDB snapshot; commits go
//! through a `WriteBatch` under a mutex that also provides the uniqueness
//! check.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{keys, ALL_CFS, CF_AUDIT, CF_FLAGS};
use super::store::{FlagChange, FlagStore, FlagWrite, SharedFlagStore, StoreError, StoreResult};
use crate::audit::{AuditLog, AuditLogEntry, AuditQuery};
use crate::context::ContextRef;
use crate::flag::{FlagKey, FlagRecord};

/// Persistent flag store
pub struct RocksFlagStore {
    db: DB,
    path: PathBuf,
    /// Serializes read-check-write in `commit`
    commit_lock: Mutex<()>,
}

impl RocksFlagStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;
        tracing::debug!(path = %path.display(), "Opened flag store");

        Ok(Self {
            db,
            path,
            commit_lock: Mutex::new(()),
        })
    }

    pub fn shared(self) -> SharedFlagStore {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Decode every value in `cf_name` whose key starts with `prefix`.
    fn scan<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();

        for item in self.db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            values.push(decode(&value)?);
        }

        Ok(values)
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
}

fn audit_key(entry: &AuditLogEntry) -> String {
    let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or(0);
    keys::audit(nanos, &entry.id.to_string())
}

impl AuditLog for RocksFlagStore {
    fn entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>> {
        let cf = self.cf(CF_AUDIT)?;
        let mut all = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            all.push(decode::<AuditLogEntry>(&value)?);
        }
        Ok(query.apply(&all))
    }
}

impl FlagStore for RocksFlagStore {
    fn find(&self, feature: &str, context: &ContextRef) -> StoreResult<Option<FlagRecord>> {
        self.get(CF_FLAGS, &keys::flag(&FlagKey::new(feature, context)))
    }

    fn snapshot_chain(&self, feature: &str, chain: &[ContextRef]) -> StoreResult<Vec<FlagRecord>> {
        let cf = self.cf(CF_FLAGS)?;
        let snapshot = self.db.snapshot();

        let mut records = Vec::new();
        for ctx in chain {
            let key = keys::flag(&FlagKey::new(feature, ctx));
            if let Some(bytes) = snapshot.get_cf(&cf, key.as_bytes())? {
                records.push(decode(&bytes)?);
            }
        }
        Ok(records)
    }

    fn commit(&self, change: FlagChange) -> StoreResult<Option<FlagRecord>> {
        let key = change.write.key()?;
        let db_key = keys::flag(&key);
        let flags = self.cf(CF_FLAGS)?;
        let audit = self.cf(CF_AUDIT)?;

        let _guard = self.commit_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let previous: Option<FlagRecord> = self.get(CF_FLAGS, &db_key)?;

        let mut batch = WriteBatch::default();
        match &change.write {
            FlagWrite::Insert(record) => {
                if previous.is_some() {
                    return Err(StoreError::UniqueViolation(key));
                }
                batch.put_cf(&flags, db_key.as_bytes(), encode(record)?);
            }
            FlagWrite::Update(record) => {
                if previous.is_none() {
                    return Err(StoreError::NotFound(key));
                }
                batch.put_cf(&flags, db_key.as_bytes(), encode(record)?);
            }
            FlagWrite::Delete(_) => {
                if previous.is_none() {
                    return Err(StoreError::NotFound(key));
                }
                batch.delete_cf(&flags, db_key.as_bytes());
            }
        }
        batch.put_cf(
            &audit,
            audit_key(&change.audit).as_bytes(),
            encode(&change.audit)?,
        );

        self.db.write(batch)?;
        Ok(previous)
    }

    fn records_for_feature(&self, feature: &str) -> StoreResult<Vec<FlagRecord>> {
        self.scan(CF_FLAGS, &keys::feature_prefix(feature))
    }
}
