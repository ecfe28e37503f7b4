//! All job state is stored in a single JSON document guarded by an advisory file lock
//!
//! Every operation takes the lock, reads the whole store, optionally rewrites the whole store and
//! releases the lock. There is no per-job locking: cooperating processes that share the lock file
//! are serialised against each other for the full read-modify-write cycle.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::lock::StoreLock;
pub use crate::store::record::{JobRecord, TASK_LEDGER};

/// The persisted job record
pub mod record;
/// Advisory lock held for the duration of each store operation
pub mod lock;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Can't lock job store {}: {source}", .path.display())]
    Lock { path: PathBuf, source: io::Error },

    #[error("Job store I/O failed on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Job store {} is corrupt and no usable backup exists: {source}", .path.display())]
    Corrupt { path: PathBuf, source: serde_json::Error },

    #[error("Can't serialise job store: {0}")]
    Serialise(#[from] serde_json::Error),
}

/// Key-value access to job records, injected into the submission flow and the status aggregator
pub trait JobStore {
    /// Issue a job id strictly greater than every id issued before, across restarts
    fn next_id(&self) -> Result<u64, StoreError>;
    fn get(&self, job_id: u64) -> Result<Option<JobRecord>, StoreError>;
    /// Insert or replace the record with the same job id
    fn put(&self, record: &JobRecord) -> Result<(), StoreError>;
    /// Replace the record with the same job id only if it still exists
    ///
    /// Returns whether a record was replaced. Unlike `put` this never brings back a record
    /// another handle deleted in the meantime.
    fn update(&self, record: &JobRecord) -> Result<bool, StoreError>;
    fn delete(&self, record: &JobRecord) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<JobRecord>, StoreError>;
}

/// Persisted layout of the store
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreContents {
    job_counter: u64,
    jobs: Vec<JobRecord>,
}

pub struct FileJobStore {
    path: PathBuf,
    lock_path: PathBuf,
    backup_path: PathBuf,
}

impl FileJobStore {
    pub fn open(path: &Path) -> Result<FileJobStore, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
        }
        if !path.exists() { info!("Creating new job store {}", path.display()) }

        Ok(FileJobStore {
            path: path.to_path_buf(),
            lock_path: sibling(path, "lock"),
            backup_path: sibling(path, "bak"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.lock_path)
            .map_err(|source| StoreError::Lock { path: self.lock_path.clone(), source })
    }

    fn read<T>(&self, f: impl FnOnce(&StoreContents) -> T) -> Result<T, StoreError> {
        let _lock = self.lock()?;
        let (contents, _) = self.load()?;
        Ok(f(&contents))
    }

    fn modify<T>(&self, f: impl FnOnce(&mut StoreContents) -> T) -> Result<T, StoreError> {
        let _lock = self.lock()?;
        let (mut contents, from_primary) = self.load()?;
        let out = f(&mut contents);
        self.save(&contents, from_primary)?;
        Ok(out)
    }

    /// Load the store, falling back to the backup when the primary is missing or unreadable
    ///
    /// Returns the contents and whether they came from the primary file.
    fn load(&self) -> Result<(StoreContents, bool), StoreError> {
        let primary_err = match read_contents(&self.path) {
            Ok(Some(contents)) => return Ok((contents, true)),
            Ok(None) => None,
            Err(err @ StoreError::Corrupt { .. }) => Some(err),
            Err(err) => return Err(err),
        };

        match (read_contents(&self.backup_path), primary_err) {
            (Ok(Some(mut contents)), err) => {
                match err {
                    Some(err) => warn!("{err}, recovering from {}", self.backup_path.display()),
                    None => warn!("Job store {} is missing, recovering from {}", self.path.display(), self.backup_path.display()),
                }
                // the backup is at most one write behind and a write bumps the counter at most once
                contents.job_counter += 1;
                Ok((contents, false))
            }
            (Ok(None), None) => Ok((StoreContents::default(), false)),
            (_, Some(err)) => Err(err),
            (Err(err), None) => Err(err),
        }
    }

    /// Rewrite the whole store: temp file, fsync, rotate the old primary to backup, rename
    ///
    /// Contents that didn't come from the primary (fresh or recovered) are copied to the backup
    /// as well, so the backup never falls more than one write behind.
    fn save(&self, contents: &StoreContents, rotate: bool) -> Result<(), StoreError> {
        let tmp_path = sibling(&self.path, "tmp");
        let json = serde_json::to_vec_pretty(contents)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| StoreError::Io { path, source }
        };

        {
            let mut file = File::create(&tmp_path).map_err(io_err(&tmp_path))?;
            file.write_all(&json).map_err(io_err(&tmp_path))?;
            file.sync_all().map_err(io_err(&tmp_path))?;
        }

        if rotate {
            fs::copy(&self.path, &self.backup_path).map_err(io_err(&self.backup_path))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;
        if !rotate {
            fs::copy(&self.path, &self.backup_path).map_err(io_err(&self.backup_path))?;
        }

        Ok(())
    }
}

impl JobStore for FileJobStore {
    fn next_id(&self) -> Result<u64, StoreError> {
        self.modify(|contents| {
            contents.job_counter += 1;
            contents.job_counter
        })
    }

    fn get(&self, job_id: u64) -> Result<Option<JobRecord>, StoreError> {
        self.read(|contents| contents.jobs.iter().find(|job| job.job_id == job_id).cloned())
    }

    fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.modify(|contents| {
            match contents.jobs.iter_mut().find(|job| job.job_id == record.job_id) {
                Some(existing) => *existing = record.clone(),
                None => contents.jobs.push(record.clone()),
            }
        })
    }

    fn update(&self, record: &JobRecord) -> Result<bool, StoreError> {
        let _lock = self.lock()?;
        let (mut contents, from_primary) = self.load()?;
        let Some(existing) = contents.jobs.iter_mut().find(|job| job.job_id == record.job_id) else {
            return Ok(false);
        };
        *existing = record.clone();
        self.save(&contents, from_primary)?;
        Ok(true)
    }

    fn delete(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.modify(|contents| contents.jobs.retain(|job| job.job_id != record.job_id))
    }

    fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.read(|contents| contents.jobs.clone())
    }
}

/// `Ok(None)` when the file doesn't exist
fn read_contents(path: &Path) -> Result<Option<StoreContents>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StoreError::Io { path: path.to_path_buf(), source }),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt { path: path.to_path_buf(), source })
}

/// `job_store.json` -> `job_store.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(job_id: u64) -> JobRecord {
        JobRecord {
            job_id,
            submit_id: Some(100 + job_id),
            working_directory: PathBuf::from(format!("/work/{job_id}")),
            submit_directory: PathBuf::from("submit"),
        }
    }

    #[test]
    fn test_sibling_paths() {
        let path = Path::new("/state/dev/job_store.json");
        assert_eq!(sibling(path, "lock"), Path::new("/state/dev/job_store.json.lock"));
        assert_eq!(sibling(path, "bak"), Path::new("/state/dev/job_store.json.bak"));
    }

    #[test]
    fn test_put_is_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(&dir.path().join("job_store.json")).unwrap();

        store.put(&record(1)).unwrap();
        let mut updated = record(1);
        updated.submit_id = None;
        store.put(&updated).unwrap();

        assert_eq!(store.list().unwrap(), vec![updated.clone()]);
        assert_eq!(store.get(1).unwrap(), Some(updated));
    }

    #[test]
    fn test_delete_removes_only_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(&dir.path().join("job_store.json")).unwrap();
        store.put(&record(1)).unwrap();
        store.put(&record(2)).unwrap();

        store.delete(&record(1)).unwrap();

        assert_eq!(store.get(1).unwrap(), None);
        assert_eq!(store.get(2).unwrap(), Some(record(2)));
    }

    #[test]
    fn test_update_only_replaces_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(&dir.path().join("job_store.json")).unwrap();
        store.put(&record(1)).unwrap();

        let mut updated = record(1);
        updated.submit_id = None;
        assert!(store.update(&updated).unwrap());
        assert_eq!(store.get(1).unwrap(), Some(updated));

        assert!(!store.update(&record(2)).unwrap());
        assert_eq!(store.get(2).unwrap(), None);
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(&dir.path().join("nested").join("job_store.json")).unwrap();

        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.next_id().unwrap(), 1);
    }
}
