//! Keystore of secrets protected by the master secret.
//!
//! Every entry is sealed with a key derived from the master secret. A
//! master secret change never rewrites the live store in place: the
//! re-encrypted copy goes to a staged slot and only replaces the live store
//! on [`KeyStore::commit`]. Until then, a handle opened with the old secret
//! keeps serving reads.

pub mod backend;
pub mod crypto;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub use backend::{FileKeyStoreBackend, KeyStoreBackend, MemoryKeyStoreBackend};
pub use crypto::{CryptoError, SealedValue, StoreKey};

const STORE_VERSION: u32 = 1;

/// Plaintext sealed into every store to recognise the right key.
const CHECK_MARKER: &[u8] = b"keywarden-keystore-check";

/// Keystore errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Keystore I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keystore format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Keystore entry '{0}' is not valid UTF-8")]
    InvalidEntry(String),

    #[error("Keystore is locked")]
    Locked,

    #[error("Keystore cannot be opened with the given secret")]
    WrongSecret,

    #[error("Keystore has not been initialized")]
    NotInitialized,

    #[error("A master secret change is staged and must be committed first")]
    ChangePending,
}

/// Persisted keystore document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedStore {
    pub version: u32,
    /// HKDF salt (base64)
    pub salt: String,
    /// Sealed [`CHECK_MARKER`]
    pub check: SealedValue,
    #[serde(default)]
    pub entries: BTreeMap<String, SealedValue>,
    pub updated_at: DateTime<Utc>,
}

impl SealedStore {
    /// New empty store sealed under `secret`, with a fresh salt.
    pub fn create(secret: &[u8]) -> Result<(Self, StoreKey), StoreError> {
        let salt = crypto::generate_salt();
        let key = StoreKey::derive(secret, &salt)?;
        let check = crypto::seal(&key, CHECK_MARKER)?;
        let store = Self {
            version: STORE_VERSION,
            salt,
            check,
            entries: BTreeMap::new(),
            updated_at: Utc::now(),
        };
        Ok((store, key))
    }

    /// Derive the store key for `secret`, failing if it does not match.
    pub fn unlock(&self, secret: &[u8]) -> Result<StoreKey, StoreError> {
        let key = StoreKey::derive(secret, &self.salt)?;
        match crypto::open(&key, &self.check) {
            Ok(marker) if marker.as_slice() == CHECK_MARKER => Ok(key),
            Ok(_) | Err(CryptoError::DecryptionFailed) => Err(StoreError::WrongSecret),
            Err(e) => Err(e.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Live store together with the key it was opened with.
struct OpenStore {
    sealed: SealedStore,
    key: StoreKey,
}

/// The protected secret store.
pub struct KeyStore {
    backend: Box<dyn KeyStoreBackend>,
    open: RwLock<Option<OpenStore>>,
    cache: DashMap<String, Zeroizing<String>>,
}

impl KeyStore {
    pub fn new(backend: Box<dyn KeyStoreBackend>) -> Self {
        Self {
            backend,
            open: RwLock::new(None),
            cache: DashMap::new(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileKeyStoreBackend::new(path)))
    }

    pub fn memory() -> Self {
        Self::new(Box::new(MemoryKeyStoreBackend::new()))
    }

    pub fn is_initialized(&self) -> Result<bool, StoreError> {
        Ok(self.backend.load_live()?.is_some())
    }

    /// Create an empty live store under `secret` unless one exists.
    /// Returns whether a store was created.
    pub fn initialize(&self, secret: &[u8]) -> Result<bool, StoreError> {
        if self.is_initialized()? {
            return Ok(false);
        }
        let (store, key) = SealedStore::create(secret)?;
        self.backend.save_live(&store)?;
        *self.write_open() = Some(OpenStore { sealed: store, key });
        info!("Initialized empty keystore");
        Ok(true)
    }

    /// Whether any protected entries exist, live or staged.
    pub fn has_content(&self) -> Result<bool, StoreError> {
        let live = self.backend.load_live()?.is_some_and(|s| !s.is_empty());
        Ok(live || self.backend.load_staged()?.is_some_and(|s| !s.is_empty()))
    }

    pub fn is_unlocked(&self) -> bool {
        self.read_open().is_some()
    }

    /// Open the live store with `secret`. An already open store is kept as
    /// is, whatever secret it was opened with.
    pub fn unlock(&self, secret: &[u8]) -> Result<(), StoreError> {
        let mut open = self.write_open();
        if open.is_some() {
            return Ok(());
        }
        let sealed = self.backend.load_live()?.ok_or(StoreError::NotInitialized)?;
        let key = sealed.unlock(secret)?;
        *open = Some(OpenStore { sealed, key });
        debug!("Keystore unlocked");
        Ok(())
    }

    pub fn aliases(&self) -> Result<Vec<String>, StoreError> {
        let open = self.read_open();
        let store = open.as_ref().ok_or(StoreError::Locked)?;
        Ok(store.sealed.entries.keys().cloned().collect())
    }

    /// Decrypted value for `alias`.
    pub fn get(&self, alias: &str) -> Result<Option<Zeroizing<String>>, StoreError> {
        if let Some(hit) = self.cache.get(alias) {
            return Ok(Some(hit.value().clone()));
        }

        let open = self.read_open();
        let store = open.as_ref().ok_or(StoreError::Locked)?;
        let Some(sealed) = store.sealed.entries.get(alias) else {
            return Ok(None);
        };

        let plain = crypto::open(&store.key, sealed)?;
        let value = std::str::from_utf8(&plain)
            .map(|s| Zeroizing::new(s.to_string()))
            .map_err(|_| StoreError::InvalidEntry(alias.to_string()))?;
        self.cache.insert(alias.to_string(), value.clone());
        Ok(Some(value))
    }

    /// Seal `value` under `alias` in the live store.
    ///
    /// Refused while a master secret change is staged, since the staged copy
    /// would not carry the new entry.
    pub fn set(&self, alias: &str, value: &str) -> Result<(), StoreError> {
        if self.has_staged()? {
            return Err(StoreError::ChangePending);
        }

        let mut open = self.write_open();
        let store = open.as_mut().ok_or(StoreError::Locked)?;

        let mut next = store.sealed.clone();
        next.entries
            .insert(alias.to_string(), crypto::seal(&store.key, value.as_bytes())?);
        next.updated_at = Utc::now();
        self.backend.save_live(&next)?;

        store.sealed = next;
        self.cache
            .insert(alias.to_string(), Zeroizing::new(value.to_string()));
        debug!(alias, "Stored keystore entry");
        Ok(())
    }

    pub fn has_staged(&self) -> Result<bool, StoreError> {
        Ok(self.backend.load_staged()?.is_some())
    }

    /// Current content of the staged slot, for restoring after a failed
    /// change.
    pub fn staged(&self) -> Result<Option<SealedStore>, StoreError> {
        self.backend.load_staged()
    }

    /// Put the staged slot back to `previous` (or empty it).
    pub fn restore_staged(&self, previous: Option<&SealedStore>) -> Result<(), StoreError> {
        match previous {
            Some(store) => self.backend.save_staged(store),
            None => self.backend.discard_staged(),
        }
    }

    /// Whether the staged store opens under `secret`. `false` when nothing is
    /// staged.
    pub fn staged_opens_with(&self, secret: &[u8]) -> Result<bool, StoreError> {
        match self.backend.load_staged()? {
            Some(staged) => match staged.unlock(secret) {
                Ok(_) => Ok(true),
                Err(StoreError::WrongSecret) => Ok(false),
                Err(e) => Err(e),
            },
            None => Ok(false),
        }
    }

    /// Decrypt every entry under `current` and write a copy sealed under
    /// `new` to the staged slot.
    ///
    /// The source is the staged store when a change is already pending, the
    /// live store otherwise. Nothing is written unless every entry decrypts
    /// and re-seals. `current` may be `None` only for a source without
    /// entries.
    pub fn stage_reencrypted(&self, current: Option<&[u8]>, new: &[u8]) -> Result<usize, StoreError> {
        let source = match self.backend.load_staged()? {
            Some(staged) => staged,
            None => self.backend.load_live()?.ok_or(StoreError::NotInitialized)?,
        };

        let source_key = match current {
            Some(secret) => Some(source.unlock(secret)?),
            None if source.is_empty() => None,
            None => return Err(StoreError::Locked),
        };

        let (mut target, target_key) = SealedStore::create(new)?;
        if let Some(source_key) = source_key {
            for (alias, sealed) in &source.entries {
                let plain = crypto::open(&source_key, sealed)?;
                target
                    .entries
                    .insert(alias.clone(), crypto::seal(&target_key, &plain)?);
            }
        }

        self.backend.save_staged(&target)?;
        info!(entries = target.len(), "Staged re-encrypted keystore");
        Ok(target.len())
    }

    /// Promote the staged store to live and drop every cached value.
    /// Returns `false` when nothing was staged.
    pub fn commit(&self) -> Result<bool, StoreError> {
        let promoted = self.backend.promote_staged()?;
        if promoted {
            self.invalidate_cache();
            info!("Committed staged keystore");
        }
        Ok(promoted)
    }

    /// Forget decrypted values and the open handle; the next access opens
    /// the live store again.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
        self.write_open().take();
        debug!("Keystore cache invalidated");
    }

    fn read_open(&self) -> std::sync::RwLockReadGuard<'_, Option<OpenStore>> {
        self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_open(&self) -> std::sync::RwLockWriteGuard<'_, Option<OpenStore>> {
        self.open.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("backend", &self.backend)
            .field("unlocked", &self.is_unlocked())
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_entry() -> KeyStore {
        let store = KeyStore::memory();
        assert!(store.initialize(b"geoserver").unwrap());
        store.set("config:password:key", "s3cr3t").unwrap();
        store
    }

    #[test]
    fn test_initialize_once() {
        let store = KeyStore::memory();
        assert!(!store.is_initialized().unwrap());
        assert!(store.initialize(b"geoserver").unwrap());
        assert!(!store.initialize(b"other").unwrap());
        assert!(!store.has_content().unwrap());
    }

    #[test]
    fn test_unlock_requires_right_secret() {
        let store = store_with_entry();
        store.invalidate_cache();
        assert!(matches!(store.get("config:password:key"), Err(StoreError::Locked)));

        assert!(matches!(store.unlock(b"wrong"), Err(StoreError::WrongSecret)));
        store.unlock(b"geoserver").unwrap();
        assert_eq!(
            store.get("config:password:key").unwrap().as_deref().map(String::as_str),
            Some("s3cr3t")
        );
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_reencrypt_stage_and_commit() {
        let store = store_with_entry();
        assert_eq!(store.stage_reencrypted(Some(b"geoserver".as_slice()), b"geoserver1").unwrap(), 1);
        assert!(store.has_staged().unwrap());
        assert!(store.staged_opens_with(b"geoserver1").unwrap());
        assert!(!store.staged_opens_with(b"geoserver").unwrap());

        // the handle opened with the old secret still serves reads
        assert_eq!(store.get("config:password:key").unwrap().unwrap().as_str(), "s3cr3t");
        assert!(matches!(store.set("other", "x"), Err(StoreError::ChangePending)));

        assert!(store.commit().unwrap());
        assert!(!store.is_unlocked());
        assert!(matches!(store.unlock(b"geoserver"), Err(StoreError::WrongSecret)));
        store.unlock(b"geoserver1").unwrap();
        assert_eq!(store.get("config:password:key").unwrap().unwrap().as_str(), "s3cr3t");

        // nothing left to commit
        assert!(!store.commit().unwrap());
    }

    #[test]
    fn test_chained_changes_use_staged_source() {
        let store = store_with_entry();
        store.stage_reencrypted(Some(b"geoserver".as_slice()), b"geoserver1").unwrap();

        // the live store still uses the first secret, the staged one the second
        assert!(matches!(
            store.stage_reencrypted(Some(b"geoserver".as_slice()), b"geoserver2"),
            Err(StoreError::WrongSecret)
        ));
        store.stage_reencrypted(Some(b"geoserver1".as_slice()), b"geoserver2").unwrap();
        assert!(store.staged_opens_with(b"geoserver2").unwrap());
    }

    #[test]
    fn test_failed_reencrypt_leaves_slots_alone() {
        let store = store_with_entry();
        assert!(store.stage_reencrypted(Some(b"wrong".as_slice()), b"geoserver1").is_err());
        assert!(!store.has_staged().unwrap());

        assert!(matches!(
            store.stage_reencrypted(None, b"geoserver1"),
            Err(StoreError::Locked)
        ));
        assert!(!store.has_staged().unwrap());
    }

    #[test]
    fn test_restore_staged() {
        let store = store_with_entry();
        store.stage_reencrypted(Some(b"geoserver".as_slice()), b"geoserver1").unwrap();
        let previous = store.staged().unwrap();

        store.stage_reencrypted(Some(b"geoserver1".as_slice()), b"geoserver2").unwrap();
        store.restore_staged(previous.as_ref()).unwrap();
        assert!(store.staged_opens_with(b"geoserver1").unwrap());

        store.restore_staged(None).unwrap();
        assert!(!store.has_staged().unwrap());
    }

    #[test]
    fn test_empty_store_stages_without_current_secret() {
        let store = KeyStore::memory();
        store.initialize(b"bootstrap").unwrap();
        assert_eq!(store.stage_reencrypted(None, b"first").unwrap(), 0);
        assert!(store.staged_opens_with(b"first").unwrap());
    }
}
