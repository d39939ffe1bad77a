//! JSON persistence of provider and master password configurations.
//!
//! Layout under the security root:
//!
//! ```text
//! masterpw.json                  active provider
//! masterpw/<name>/config.json    one per provider
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use keywarden_types::{MasterPasswordConfig, MasterPasswordProviderConfig};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::{SecurityError, SecurityResult};

const MASTER_CONFIG_FILE: &str = "masterpw.json";
const PROVIDER_DIR: &str = "masterpw";
const PROVIDER_CONFIG_FILE: &str = "config.json";

/// Reads and writes security configuration documents.
#[derive(Debug, Clone)]
pub struct SecurityConfigStore {
    root: PathBuf,
}

impl SecurityConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory reserved for provider `name`.
    pub fn provider_dir(&self, name: &str) -> PathBuf {
        self.root.join(PROVIDER_DIR).join(name)
    }

    pub fn load_master_config(&self) -> SecurityResult<Option<MasterPasswordConfig>> {
        read_json(&self.root.join(MASTER_CONFIG_FILE))
    }

    pub fn save_master_config(&self, config: &MasterPasswordConfig) -> SecurityResult<()> {
        write_json(&self.root.join(MASTER_CONFIG_FILE), config)
    }

    pub fn load_provider_configs(&self) -> SecurityResult<Vec<MasterPasswordProviderConfig>> {
        let dir = self.root.join(PROVIDER_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence_error(&dir, e)),
        };

        let mut configs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| persistence_error(&dir, e))?;
            let path = entry.path().join(PROVIDER_CONFIG_FILE);
            match read_json::<MasterPasswordProviderConfig>(&path)? {
                Some(config) => configs.push(config),
                None => warn!(dir = %entry.path().display(), "Provider directory without config, skipping"),
            }
        }
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    pub fn save_provider_config(&self, config: &MasterPasswordProviderConfig) -> SecurityResult<()> {
        write_json(
            &self.provider_dir(&config.name).join(PROVIDER_CONFIG_FILE),
            config,
        )
    }
}

fn persistence_error(path: &Path, err: impl ToString) -> SecurityError {
    SecurityError::Persistence {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> SecurityResult<Option<T>> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| persistence_error(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(persistence_error(path, e)),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> SecurityResult<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| persistence_error(path, e))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| persistence_error(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| persistence_error(path, e))
}
