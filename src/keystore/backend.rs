//! Storage slots for the live and staged keystore documents.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use super::{SealedStore, StoreError};

/// Where sealed keystore documents live.
///
/// A backend has two slots: the live store every reader uses, and a staged
/// store written by a master secret change and promoted on commit.
pub trait KeyStoreBackend: Send + Sync + fmt::Debug {
    fn load_live(&self) -> Result<Option<SealedStore>, StoreError>;

    fn save_live(&self, store: &SealedStore) -> Result<(), StoreError>;

    fn load_staged(&self) -> Result<Option<SealedStore>, StoreError>;

    /// Replace the staged slot in one step. A failed write must leave the
    /// previous staged content in place.
    fn save_staged(&self, store: &SealedStore) -> Result<(), StoreError>;

    fn discard_staged(&self) -> Result<(), StoreError>;

    /// Move the staged store over the live one. Returns `false` when
    /// nothing was staged.
    fn promote_staged(&self) -> Result<bool, StoreError>;
}

/// JSON documents on disk: `keystore.json` and `keystore.json.new`.
#[derive(Debug, Clone)]
pub struct FileKeyStoreBackend {
    live_path: PathBuf,
    staged_path: PathBuf,
}

impl FileKeyStoreBackend {
    pub fn new(live_path: impl Into<PathBuf>) -> Self {
        let live_path = live_path.into();
        let staged_path = suffixed(&live_path, "new");
        Self {
            live_path,
            staged_path,
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged_path
    }
}

impl KeyStoreBackend for FileKeyStoreBackend {
    fn load_live(&self) -> Result<Option<SealedStore>, StoreError> {
        read_document(&self.live_path)
    }

    fn save_live(&self, store: &SealedStore) -> Result<(), StoreError> {
        write_document(&self.live_path, store)
    }

    fn load_staged(&self) -> Result<Option<SealedStore>, StoreError> {
        read_document(&self.staged_path)
    }

    fn save_staged(&self, store: &SealedStore) -> Result<(), StoreError> {
        write_document(&self.staged_path, store)
    }

    fn discard_staged(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.staged_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn promote_staged(&self) -> Result<bool, StoreError> {
        if !self.staged_path.exists() {
            return Ok(false);
        }
        fs::rename(&self.staged_path, &self.live_path)?;
        debug!(path = %self.live_path.display(), "Promoted staged keystore");
        Ok(true)
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn read_document(path: &Path) -> Result<Option<SealedStore>, StoreError> {
    match fs::read(path) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temp file and rename, so readers see the old document or
/// the new one and never a prefix.
fn write_document(path: &Path, store: &SealedStore) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(store)?;
    let tmp = suffixed(path, "tmp");

    let result = fs::write(&tmp, &data).and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %cleanup, "Could not remove temp keystore file");
            }
        }
        return Err(e.into());
    }
    Ok(())
}

/// In-process backend, for embedding without a security directory and for
/// tests.
#[derive(Debug, Default)]
pub struct MemoryKeyStoreBackend {
    live: Mutex<Option<SealedStore>>,
    staged: Mutex<Option<SealedStore>>,
}

impl MemoryKeyStoreBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStoreBackend for MemoryKeyStoreBackend {
    fn load_live(&self) -> Result<Option<SealedStore>, StoreError> {
        Ok(self.live.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_live(&self, store: &SealedStore) -> Result<(), StoreError> {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(store.clone());
        Ok(())
    }

    fn load_staged(&self) -> Result<Option<SealedStore>, StoreError> {
        Ok(self.staged.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_staged(&self, store: &SealedStore) -> Result<(), StoreError> {
        *self.staged.lock().unwrap_or_else(PoisonError::into_inner) = Some(store.clone());
        Ok(())
    }

    fn discard_staged(&self) -> Result<(), StoreError> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }

    fn promote_staged(&self) -> Result<bool, StoreError> {
        let staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner).take();
        match staged {
            Some(store) => {
                *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(store);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_dir;

    #[test]
    fn test_file_backend_slots() {
        let dir = temp_dir("backend");
        let backend = FileKeyStoreBackend::new(dir.join("keystore.json"));
        assert_eq!(backend.staged_path(), dir.join("keystore.json.new"));

        assert!(backend.load_live().unwrap().is_none());
        assert!(!backend.promote_staged().unwrap());

        let (live, _) = SealedStore::create(b"old").unwrap();
        backend.save_live(&live).unwrap();
        assert_eq!(backend.load_live().unwrap(), Some(live.clone()));

        let (staged, _) = SealedStore::create(b"new").unwrap();
        backend.save_staged(&staged).unwrap();
        assert!(backend.staged_path().exists());

        assert!(backend.promote_staged().unwrap());
        assert!(!backend.staged_path().exists());
        assert_eq!(backend.load_live().unwrap(), Some(staged));

        // discarding an empty slot is fine
        backend.discard_staged().unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let dir = temp_dir("backend-corrupt");
        let backend = FileKeyStoreBackend::new(dir.join("keystore.json"));
        fs::write(backend.live_path(), b"{ not json").unwrap();

        assert!(matches!(backend.load_live(), Err(StoreError::Format(_))));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_backend_promote() {
        let backend = MemoryKeyStoreBackend::new();
        let (staged, _) = SealedStore::create(b"s").unwrap();
        backend.save_staged(&staged).unwrap();

        assert!(backend.promote_staged().unwrap());
        assert!(backend.load_staged().unwrap().is_none());
        assert_eq!(backend.load_live().unwrap(), Some(staged));
    }
}
