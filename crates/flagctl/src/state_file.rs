//! JSON state file holding a [`StoreSnapshot`].
//!
//! Saves go through a per-process temp file and a rename, after copying the
//! previous file to `<name>.backup`. Loading falls back to the backup when
//! the main file is unreadable. Writers serialise on an exclusive lock of
//! `<name>.lock`, held from load through save.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flagstack::{MemoryFlagStore, StoreSnapshot};
use fs4::fs_std::FileExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, "backup")
    }

    pub fn lock_path(&self) -> PathBuf {
        with_suffix(&self.path, "lock")
    }

    fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, &format!("{}.tmp", std::process::id()))
    }

    /// Block until the state file's write lock is held.
    pub fn lock(&self) -> Result<StateLock> {
        self.ensure_parent()?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("failed to lock {}", path.display()))?;
        debug!(path = %path.display(), "State lock acquired");
        Ok(StateLock { file, path })
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Read one snapshot file. `Ok(None)` if it does not exist.
    fn read(path: &Path) -> Result<Option<StoreSnapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("corrupt state file {}", path.display()))?;
        Ok(Some(snapshot))
    }

    /// Open the store, recovering from the backup if the main file is
    /// corrupt. A missing file yields an empty store.
    pub fn load(&self) -> Result<MemoryFlagStore> {
        let snapshot = match Self::read(&self.path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(path = %self.path.display(), "No state file yet, starting empty");
                StoreSnapshot::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file unreadable, trying backup");
                let backup = self.backup_path();
                let recovered = Self::read(&backup)
                    .with_context(|| format!("backup {} is unreadable too", backup.display()))?
                    .with_context(|| format!("no backup at {}", backup.display()))?;
                info!(path = %backup.display(), records = recovered.records.len(), "Recovered state from backup");
                recovered
            }
        };

        MemoryFlagStore::from_snapshot(snapshot)
            .with_context(|| format!("invalid state in {}", self.path.display()))
    }

    /// Write the store's current contents.
    pub fn save(&self, store: &MemoryFlagStore) -> Result<()> {
        let snapshot = store.snapshot()?;
        let content = serde_json::to_string_pretty(&snapshot)?;
        self.ensure_parent()?;

        if self.path.exists() {
            if let Err(e) = std::fs::copy(&self.path, self.backup_path()) {
                warn!(path = %self.path.display(), error = %e, "Failed to back up state file");
            }
        }

        let temp = self.temp_path();
        std::fs::write(&temp, content)
            .with_context(|| format!("failed to write {}", temp.display()))?;
        std::fs::rename(&temp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), records = snapshot.records.len(), "State saved");
        Ok(())
    }
}

/// Exclusive hold on `<state>.lock`, released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release state lock");
        }
    }
}

/// `flags.json` → `flags.json.<suffix>`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagstack::state::{FlagChange, FlagWrite};
    use flagstack::{AuditAction, AuditLogEntry, ContextRef, FlagRecord, FlagState, FlagStore};

    fn store_with_record() -> MemoryFlagStore {
        let store = MemoryFlagStore::new();
        let record = FlagRecord::new("new_ui", ContextRef::course(40), FlagState::On);
        let audit = AuditLogEntry::new(
            "new_ui",
            ContextRef::course(40),
            1,
            AuditAction::Created,
            None,
            FlagState::On,
        );
        store
            .commit(FlagChange::new(FlagWrite::Insert(record), audit))
            .unwrap();
        store
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateFile::new(dir.path().join("flags.json")).load().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("flags.json"));

        file.save(&store_with_record()).unwrap();
        assert!(!file.backup_path().exists());

        let loaded = file.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!file.temp_path().exists());
    }

    #[test]
    fn test_second_save_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("flags.json"));

        file.save(&MemoryFlagStore::new()).unwrap();
        file.save(&store_with_record()).unwrap();
        assert!(file.backup_path().exists());
        assert_eq!(file.backup_path(), dir.path().join("flags.json.backup"));
    }

    #[test]
    fn test_corrupt_file_recovers_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("flags.json"));

        file.save(&store_with_record()).unwrap();
        file.save(&store_with_record()).unwrap();
        std::fs::write(file.path(), "{ not json").unwrap();

        let recovered = file.load().unwrap();
        assert_eq!(recovered.len(), 1);
    }

    #[test]
    fn test_temp_file_is_per_process() {
        let file = StateFile::new("state/flags.json");
        let temp = file.temp_path();
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("flags.json.{}.tmp", std::process::id()));
        assert_eq!(file.lock_path(), PathBuf::from("state/flags.json.lock"));
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested").join("flags.json"));

        let guard = file.lock().unwrap();
        assert!(file.lock_path().exists());

        let (tx, rx) = std::sync::mpsc::channel();
        let contender = file.clone();
        let waiter = std::thread::spawn(move || {
            let _held = contender.lock().unwrap();
            tx.send(()).unwrap();
        });

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(rx.try_recv().is_err());

        drop(guard);
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_corrupt_file_without_backup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("flags.json"));
        std::fs::write(file.path(), "{ not json").unwrap();

        assert!(file.load().is_err());
    }
}
