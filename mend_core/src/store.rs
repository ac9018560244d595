//! Durable record storage.
//!
//! The [`RecordStore`] trait is the persistence seam of the engine: one
//! document per record, keyed by id, with every sub-collection nested inside
//! it, plus opaque photo blobs stored next to the documents.
//!
//! ## Implementations
//!
//! - [`FileStore`]: directory-backed storage
//!   ```text
//!   <root>/
//!   ├── records/<uuid>.json
//!   ├── photos/<uuid>/<photo-uuid>.bin
//!   └── ids.ledger
//!   ```
//! - [`MemoryStore`]: in-process storage for tests and embedding

use crate::ledger::IdLedger;
use crate::{Error, InjuryRecord, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Persistence backend for injury records and their photo blobs
pub trait RecordStore: Send + Sync {
    /// Claim an id. Returns false if the id was ever issued before.
    fn reserve_id(&self, id: Uuid) -> Result<bool>;

    /// Write the full record document, replacing any previous version atomically.
    fn put(&self, record: &InjuryRecord) -> Result<()>;

    fn load(&self, id: Uuid) -> Result<Option<InjuryRecord>>;

    /// Scan the whole collection.
    fn load_all(&self) -> Result<Vec<InjuryRecord>>;

    /// Remove a record document. Returns false if it was not present.
    fn remove(&self, id: Uuid) -> Result<bool>;

    /// Persist a photo blob and return its store-relative path.
    fn write_blob(&self, record_id: Uuid, photo_id: Uuid, bytes: &[u8]) -> Result<String>;

    fn read_blob(&self, path: &str) -> Result<Vec<u8>>;

    fn remove_blob(&self, path: &str) -> Result<()>;

    /// Remove every blob owned by a record.
    fn remove_blobs(&self, record_id: Uuid) -> Result<()>;
}

// ============================================================================
// File Store
// ============================================================================

/// Directory-backed record store with file locking
pub struct FileStore {
    root: PathBuf,
    ledger: IdLedger,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("records"))?;
        std::fs::create_dir_all(root.join("photos"))?;
        let ledger = IdLedger::new(root.join("ids.ledger"));
        tracing::debug!("Opened record store at {:?}", root);
        Ok(Self { root, ledger })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join("records").join(format!("{}.json", id))
    }

    fn blob_dir(&self, record_id: Uuid) -> PathBuf {
        self.root.join("photos").join(record_id.to_string())
    }

    /// Resolve a store-relative blob path, refusing anything that escapes the root
    fn resolve_blob(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || !relative.starts_with("photos") {
            return Err(Error::Storage(format!("invalid blob path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }

    /// Documents are only ever replaced by rename, so a plain read sees
    /// one whole version
    fn read_document(path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Atomically write `bytes` to `path`:
/// 1. Write to a temp file in the same directory
/// 2. Sync to disk
/// 3. Rename over the original
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("path {:?} has no parent", path)))?;
    std::fs::create_dir_all(parent)?;

    // Unique temp name per writer; the last rename wins
    let temp = NamedTempFile::new_in(parent)?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        writer.write_all(bytes)?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

impl RecordStore for FileStore {
    fn reserve_id(&self, id: Uuid) -> Result<bool> {
        self.ledger.reserve(id, Utc::now())
    }

    fn put(&self, record: &InjuryRecord) -> Result<()> {
        let contents = serde_json::to_vec(record)?;
        write_atomic(&self.record_path(record.id), &contents)?;
        tracing::debug!("Saved record {} ({} bytes)", record.id, contents.len());
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<InjuryRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let contents = Self::read_document(&path)?;
        let record = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("record {} is corrupted: {}", id, e)))?;
        Ok(Some(record))
    }

    fn load_all(&self) -> Result<Vec<InjuryRecord>> {
        let dir = self.root.join("records");
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let contents = match Self::read_document(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!("Unable to read record file {:?}: {}. Skipping.", path, e);
                    continue;
                }
            };

            match serde_json::from_str::<InjuryRecord>(&contents) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Failed to parse record file {:?}: {}. Skipping.", path, e);
                }
            }
        }

        tracing::debug!("Loaded {} records from {:?}", records.len(), dir);
        Ok(records)
    }

    fn remove(&self, id: Uuid) -> Result<bool> {
        let path = self.record_path(id);
        // Tombstone first: a failed append leaves the document in place
        self.ledger.record_purge(id, Utc::now())?;
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        tracing::debug!("Removed record file {:?}", path);
        Ok(true)
    }

    fn write_blob(&self, record_id: Uuid, photo_id: Uuid, bytes: &[u8]) -> Result<String> {
        let relative = format!("photos/{}/{}.bin", record_id, photo_id);
        write_atomic(&self.root.join(&relative), bytes)?;
        tracing::debug!("Stored {} byte blob at {}", bytes.len(), relative);
        Ok(relative)
    }

    fn read_blob(&self, path: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.resolve_blob(path)?)?)
    }

    fn remove_blob(&self, path: &str) -> Result<()> {
        match std::fs::remove_file(self.resolve_blob(path)?) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn remove_blobs(&self, record_id: Uuid) -> Result<()> {
        let dir = self.blob_dir(record_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            tracing::debug!("Removed blob directory {:?}", dir);
        }
        Ok(())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory record store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, InjuryRecord>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    issued: Mutex<HashSet<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordStore for MemoryStore {
    fn reserve_id(&self, id: Uuid) -> Result<bool> {
        Ok(lock(&self.issued).insert(id))
    }

    fn put(&self, record: &InjuryRecord) -> Result<()> {
        lock(&self.records).insert(record.id, record.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<InjuryRecord>> {
        Ok(lock(&self.records).get(&id).cloned())
    }

    fn load_all(&self) -> Result<Vec<InjuryRecord>> {
        Ok(lock(&self.records).values().cloned().collect())
    }

    fn remove(&self, id: Uuid) -> Result<bool> {
        Ok(lock(&self.records).remove(&id).is_some())
    }

    fn write_blob(&self, record_id: Uuid, photo_id: Uuid, bytes: &[u8]) -> Result<String> {
        let path = format!("photos/{}/{}.bin", record_id, photo_id);
        lock(&self.blobs).insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    fn read_blob(&self, path: &str) -> Result<Vec<u8>> {
        lock(&self.blobs)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no blob at '{}'", path)))
    }

    fn remove_blob(&self, path: &str) -> Result<()> {
        lock(&self.blobs).remove(path);
        Ok(())
    }

    fn remove_blobs(&self, record_id: Uuid) -> Result<()> {
        let prefix = format!("photos/{}/", record_id);
        lock(&self.blobs).retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EmergencyLevel, InjuryDraft, Severity};

    fn sample_record() -> InjuryRecord {
        let draft = InjuryDraft::new("Cut", Severity::Minor, EmergencyLevel::Routine)
            .with_body_part("Finger");
        crate::repository::build_record(Uuid::new_v4(), Utc::now(), draft)
    }

    #[test]
    fn test_put_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let record = sample_record();
        store.put(&record).unwrap();

        let loaded = store.load(record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_load_missing_is_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        assert!(store.load(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_document_skipped_on_scan() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let record = sample_record();
        store.put(&record).unwrap();

        let bad_id = Uuid::new_v4();
        std::fs::write(
            temp_dir.path().join("records").join(format!("{}.json", bad_id)),
            "{ invalid json }",
        )
        .unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, record.id);

        let err = store.load(bad_id).unwrap_err();
        assert!(err.is_storage());
    }

    #[test]
    fn test_atomic_put_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let record = sample_record();
        store.put(&record).unwrap();
        store.put(&record).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path().join("records"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(true, |ext| ext != "json"))
            .collect();
        assert!(extras.is_empty(), "Found stray files: {:?}", extras);
    }

    #[test]
    fn test_concurrent_puts_leave_one_whole_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileStore::open(temp_dir.path()).unwrap());
        let base = sample_record();

        let versions: Vec<InjuryRecord> = (0..4)
            .map(|i| {
                let mut version = base.clone();
                version.description = format!("writer {}", i);
                version
            })
            .collect();
        let handles: Vec<_> = versions
            .iter()
            .cloned()
            .map(|version| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.put(&version).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = store.load(base.id).unwrap().unwrap();
        assert!(versions.contains(&loaded));
        assert_eq!(std::fs::read_dir(temp_dir.path().join("records")).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_records_purge_and_blocks_reuse() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let record = sample_record();
        assert!(store.reserve_id(record.id).unwrap());
        store.put(&record).unwrap();

        assert!(store.remove(record.id).unwrap());
        assert!(!store.remove(record.id).unwrap());
        assert!(!store.reserve_id(record.id).unwrap());
    }

    #[test]
    fn test_blob_lifecycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let record_id = Uuid::new_v4();
        let path = store.write_blob(record_id, Uuid::new_v4(), b"jpeg bytes").unwrap();
        assert_eq!(store.read_blob(&path).unwrap(), b"jpeg bytes");

        store.remove_blobs(record_id).unwrap();
        assert!(store.read_blob(&path).is_err());
        // Removing an already-removed blob is fine
        store.remove_blob(&path).unwrap();
    }

    #[test]
    fn test_blob_path_cannot_escape_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let err = store.read_blob("photos/../ids.ledger").unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.read_blob("/etc/passwd").is_err());
    }

    #[test]
    fn test_memory_store_never_reissues() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(store.reserve_id(id).unwrap());
        assert!(!store.reserve_id(id).unwrap());
    }
}
