//! Backup and rollback of files the pipeline writes.
//!
//! Each backup lives under the backup root in a directory named after the
//! xxh3 hash of the file's canonical path:
//!
//! ```text
//! <root>/<hash>/<id>.orig   raw bytes as they were before the write
//! <root>/<hash>/<id>.json   BackupRecord sidecar
//! ```
//!
//! The sidecar is enough to list and restore a backup without touching the
//! live file.

use crate::atomic::atomic_write;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Tag on the backup taken right before a restore overwrites a file.
pub const BEFORE_RESTORE_TAG: &str = "before-restore";

const DATA_EXT: &str = "orig";
const META_EXT: &str = "json";

/// Last stamp handed out by [`next_stamp_ns`].
static LAST_STAMP_NS: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("failed to create backup root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backup I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid backup metadata {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no backup `{id}` for {path}")]
    NotFound { path: PathBuf, id: String },
}

impl BackupError {
    fn io(path: &Path, source: io::Error) -> Self {
        BackupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Metadata of one stored backup. The bytes themselves stay on disk; read
/// them with [`BackupManager::original_bytes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    /// Canonical path of the backed-up file
    pub path: PathBuf,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Nanoseconds since the Unix epoch, strictly increasing within a
    /// process. Orders records taken by different processes too.
    pub stamp_ns: u64,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl BackupRecord {
    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.timestamp_ms)
    }

    fn newest_first(a: &BackupRecord, b: &BackupRecord) -> std::cmp::Ordering {
        (b.stamp_ns, &b.id).cmp(&(a.stamp_ns, &a.id))
    }
}

/// Identifier for one pipeline run, unique enough to tell runs apart in
/// backup metadata.
pub fn new_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seed = format!("{}:{}", std::process::id(), nanos);
    format!("{:08x}", xxh3_64(seed.as_bytes()) as u32)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Wall-clock nanoseconds, bumped past the previous stamp when the clock
/// has not advanced.
fn next_stamp_ns() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    let previous = match LAST_STAMP_NS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last.saturating_add(1)))
    }) {
        Ok(previous) | Err(previous) => previous,
    };
    now.max(previous.saturating_add(1))
}

/// Canonical form used for hashing and locking. Falls back to an absolute
/// path when the file does not exist.
pub fn canonical_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// Stores, lists, restores and prunes backups under one root directory.
///
/// Safe to share across worker threads. Operations on the same path are
/// serialized by a per-path lock.
pub struct BackupManager {
    root: PathBuf,
    run_id: String,
    /// Backups taken by this run, keyed by canonical path
    taken: Mutex<HashMap<PathBuf, BackupRecord>>,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl BackupManager {
    /// Open (creating if needed) the backup root.
    pub fn new(root: impl Into<PathBuf>, run_id: impl Into<String>) -> Result<Self, BackupError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| BackupError::CreateRoot {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            run_id: run_id.into(),
            taken: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn lock_for(&self, canonical: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(canonical.to_path_buf())
            .or_default()
            .clone()
    }

    fn dir_for(&self, canonical: &Path) -> PathBuf {
        let key = xxh3_64(canonical.to_string_lossy().as_bytes());
        self.root.join(format!("{key:016x}"))
    }

    fn data_path(&self, record: &BackupRecord) -> PathBuf {
        self.dir_for(&record.path)
            .join(format!("{}.{DATA_EXT}", record.id))
    }

    fn meta_path(&self, record: &BackupRecord) -> PathBuf {
        self.dir_for(&record.path)
            .join(format!("{}.{META_EXT}", record.id))
    }

    /// Back up `path` before its first write in this run.
    ///
    /// Calling it again for the same path in the same run returns the
    /// existing record without storing anything.
    pub fn snapshot(&self, path: &Path) -> Result<BackupRecord, BackupError> {
        let canonical = canonical_path(path);
        let lock = self.lock_for(&canonical);
        let _guard = lock.lock();

        if let Some(existing) = self.taken.lock().get(&canonical) {
            debug!(path = %canonical.display(), id = %existing.id, "backup already taken this run");
            return Ok(existing.clone());
        }

        let bytes = fs::read(&canonical).map_err(|e| BackupError::io(&canonical, e))?;
        let record = self.store(&canonical, &bytes, None)?;
        self.taken.lock().insert(canonical, record.clone());
        Ok(record)
    }

    fn store(
        &self,
        canonical: &Path,
        bytes: &[u8],
        tag: Option<&str>,
    ) -> Result<BackupRecord, BackupError> {
        let stamp_ns = next_stamp_ns();
        let timestamp_ms = stamp_ns / 1_000_000;
        let record = BackupRecord {
            id: format!(
                "{timestamp_ms:013}-{}-{:06}",
                self.run_id,
                stamp_ns % 1_000_000
            ),
            path: canonical.to_path_buf(),
            timestamp_ms,
            stamp_ns,
            run_id: self.run_id.clone(),
            tag: tag.map(str::to_string),
        };

        let dir = self.dir_for(canonical);
        fs::create_dir_all(&dir).map_err(|e| BackupError::io(&dir, e))?;

        let data_path = self.data_path(&record);
        atomic_write(&data_path, bytes).map_err(|e| BackupError::io(&data_path, e))?;

        // Sidecar last: a record only becomes visible once its bytes exist
        let meta_path = self.meta_path(&record);
        let meta = serde_json::to_vec_pretty(&record).map_err(|source| BackupError::Metadata {
            path: meta_path.clone(),
            source,
        })?;
        atomic_write(&meta_path, &meta).map_err(|e| BackupError::io(&meta_path, e))?;

        info!(path = %canonical.display(), id = %record.id, bytes = bytes.len(), "stored backup");
        Ok(record)
    }

    /// The bytes saved by `record`.
    pub fn original_bytes(&self, record: &BackupRecord) -> Result<Vec<u8>, BackupError> {
        let data_path = self.data_path(record);
        fs::read(&data_path).map_err(|e| BackupError::io(&data_path, e))
    }

    /// Write `record`'s bytes back to its path.
    ///
    /// The current file, if any, is first backed up under
    /// [`BEFORE_RESTORE_TAG`]; that record is returned so the restore can
    /// itself be undone.
    pub fn restore(&self, record: &BackupRecord) -> Result<Option<BackupRecord>, BackupError> {
        let lock = self.lock_for(&record.path);
        let _guard = lock.lock();

        let bytes = self.original_bytes(record)?;

        let before = match fs::read(&record.path) {
            Ok(current) => Some(self.store(&record.path, &current, Some(BEFORE_RESTORE_TAG))?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(BackupError::io(&record.path, e)),
        };

        atomic_write(&record.path, &bytes).map_err(|e| BackupError::io(&record.path, e))?;
        info!(path = %record.path.display(), id = %record.id, "restored backup");
        Ok(before)
    }

    /// Backups of `path`, newest first.
    pub fn list(&self, path: &Path) -> Result<Vec<BackupRecord>, BackupError> {
        let canonical = canonical_path(path);
        let mut records = self.read_dir_records(&self.dir_for(&canonical))?;
        records.retain(|r| r.path == canonical);
        records.sort_by(BackupRecord::newest_first);
        Ok(records)
    }

    pub fn latest(&self, path: &Path) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self.list(path)?.into_iter().next())
    }

    pub fn find(&self, path: &Path, id: &str) -> Result<BackupRecord, BackupError> {
        self.list(path)?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| BackupError::NotFound {
                path: path.to_path_buf(),
                id: id.to_string(),
            })
    }

    fn read_dir_records(&self, dir: &Path) -> Result<Vec<BackupRecord>, BackupError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            let raw = fs::read(&path).map_err(|e| BackupError::io(&path, e))?;
            let record: BackupRecord = serde_json::from_slice(&raw)
                .map_err(|source| BackupError::Metadata { path, source })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Remove backups older than `age`, keeping the newest record of
    /// every path regardless of age.
    pub fn prune(&self, age: Duration) -> Result<Vec<BackupRecord>, BackupError> {
        let age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms().saturating_sub(age_ms);
        self.prune_before(cutoff)
    }

    /// Remove backups with a timestamp strictly before `cutoff_ms`,
    /// keeping the newest record of every path.
    pub fn prune_before(&self, cutoff_ms: u64) -> Result<Vec<BackupRecord>, BackupError> {
        let entries = fs::read_dir(&self.root).map_err(|e| BackupError::io(&self.root, e))?;

        let mut by_path: HashMap<PathBuf, Vec<BackupRecord>> = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            for record in self.read_dir_records(&entry.path())? {
                by_path.entry(record.path.clone()).or_default().push(record);
            }
        }

        let mut removed = Vec::new();
        for (path, mut records) in by_path {
            let lock = self.lock_for(&path);
            let _guard = lock.lock();

            records.sort_by(BackupRecord::newest_first);
            for record in records.into_iter().skip(1) {
                if record.timestamp_ms >= cutoff_ms {
                    continue;
                }
                for file in [self.meta_path(&record), self.data_path(&record)] {
                    match fs::remove_file(&file) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {
                            warn!(path = %file.display(), "backup file already gone");
                        }
                        Err(e) => return Err(BackupError::io(&file, e)),
                    }
                }
                debug!(path = %record.path.display(), id = %record.id, "pruned backup");
                removed.push(record);
            }
        }

        Ok(removed)
    }
}
