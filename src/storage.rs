use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use facegate_embed::Embedding;
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{FacegateError, Result};
use crate::identity::Partition;
use crate::lock::DataDirLock;

/// On-disk form of one identity.
#[derive(Debug, Serialize, Deserialize)]
pub struct FaceRecord {
    pub name: String,
    pub embedding: Vec<f32>,
}

#[derive(Serialize)]
struct FaceRecordRef<'a> {
    name: &'a str,
    embedding: &'a [f32],
}

/// Durable name → embedding map for one partition.
///
/// Every mutation rewrites the whole partition snapshot atomically. The new
/// map is persisted before it replaces the in-memory one, so a failed write
/// leaves both at the previous state.
pub struct IdentityStore {
    partition: Partition,
    path: PathBuf,
    records: Mutex<BTreeMap<String, Embedding>>,
}

impl IdentityStore {
    /// Open the partition snapshot under `dir`. A missing file is an empty store.
    pub fn open(dir: &Path, partition: Partition) -> Result<Self> {
        let path = dir.join(partition.snapshot_file());
        let records = load_snapshot(&path)?;
        info!(
            "loaded {} {} identities from {}",
            records.len(),
            partition,
            path.display()
        );
        Ok(Self {
            partition,
            path,
            records: Mutex::new(records),
        })
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert `name`. Zero-norm embeddings are rejected before anything is written.
    pub fn put(&self, name: &str, embedding: Embedding) -> Result<()> {
        embedding.ensure_usable()?;
        self.mutate(|records| {
            records.insert(name.to_string(), embedding);
            Ok(())
        })
    }

    pub fn get(&self, name: &str) -> Result<Embedding> {
        self.records
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| self.not_found(name))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.mutate(|records| match records.remove(name) {
            Some(_) => Ok(()),
            None => Err(self.not_found(name)),
        })
    }

    /// Enrolled names in lexicographic order.
    pub fn list(&self) -> Vec<String> {
        self.records.lock().keys().cloned().collect()
    }

    pub fn list_all(&self) -> BTreeMap<String, Embedding> {
        self.records.lock().clone()
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(|records| {
            records.clear();
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the records while holding the partition lock.
    pub(crate) fn with_records<R>(&self, f: impl FnOnce(&BTreeMap<String, Embedding>) -> R) -> R {
        f(&self.records.lock())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Embedding>) -> Result<R>) -> Result<R> {
        let mut guard = self.records.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        write_snapshot(&self.path, &next)?;
        debug!(
            "wrote {} snapshot ({} identities)",
            self.partition,
            next.len()
        );
        *guard = next;
        Ok(out)
    }

    fn not_found(&self, name: &str) -> FacegateError {
        FacegateError::NotFound {
            partition: self.partition,
            name: name.to_string(),
        }
    }
}

/// Both partitions, opened from one data directory.
///
/// Holds the directory lock, so only one process at a time can rewrite the
/// snapshots. A bare [`IdentityStore::open`] takes no lock and is meant for
/// read-only use.
pub struct IdentityStores {
    server: IdentityStore,
    device: IdentityStore,
    _lock: DataDirLock,
}

impl IdentityStores {
    pub fn open(dir: &Path) -> Result<Self> {
        let lock = DataDirLock::acquire(dir)?;
        Ok(Self {
            server: IdentityStore::open(dir, Partition::Server)?,
            device: IdentityStore::open(dir, Partition::Device)?,
            _lock: lock,
        })
    }

    pub fn get(&self, partition: Partition) -> &IdentityStore {
        match partition {
            Partition::Server => &self.server,
            Partition::Device => &self.device,
        }
    }
}

pub fn load_snapshot(path: &Path) -> Result<BTreeMap<String, Embedding>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(FacegateError::persistence(path, e)),
    };

    let corrupt = |reason: String| FacegateError::CorruptSnapshot {
        path: path.to_path_buf(),
        reason,
    };

    let records: Vec<FaceRecord> =
        postcard::from_bytes(&data).map_err(|e| corrupt(e.to_string()))?;

    let mut map = BTreeMap::new();
    for record in records {
        let embedding = Embedding::from_vec(record.embedding)
            .map_err(|e| corrupt(format!("record '{}': {e}", record.name)))?;
        map.insert(record.name, embedding);
    }
    Ok(map)
}

pub fn write_snapshot(path: &Path, records: &BTreeMap<String, Embedding>) -> Result<()> {
    let refs: Vec<FaceRecordRef<'_>> = records
        .iter()
        .map(|(name, embedding)| FaceRecordRef {
            name,
            embedding: embedding.as_slice(),
        })
        .collect();
    let data = postcard::to_allocvec(&refs).map_err(|e| {
        FacegateError::persistence(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        )
    })?;
    write_atomic(path, &data)
}

/// Replace `path` with `data` via a uniquely named, synced temp file in the
/// same directory and a rename. The temp file is removed on any failure.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| FacegateError::persistence(dir, e))?;

    let write = || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    };
    write().map_err(|e| FacegateError::persistence(path, e))
}
