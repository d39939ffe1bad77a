//! Master secret management.
//!
//! [`SecurityManager`] owns the provider configurations, the active master
//! password configuration and the protected keystore under one security
//! root, and exposes the master secret change entry points.
//!
//! ## Usage
//!
//! ```ignore
//! let mut security = SecurityManager::open(SecuritySettings::with_root("data/security"))?;
//!
//! security.save_master_password_provider_config(MasterPasswordProviderConfig::url(
//!     "rw", "file:///etc/keywarden/mpw1", false,
//! ))?;
//! security.save_master_password_config(
//!     &MasterPasswordConfig::new("rw"),
//!     Some("geoserver"),
//!     Some("geoserver1"),
//!     Some("geoserver1"),
//! )?;
//! security.commit_master_password_change()?;
//! ```

pub mod persist;
pub mod root_auth;
pub mod rotation;

use std::sync::Arc;

use keywarden_types::{MasterPasswordConfig, MasterPasswordProviderConfig, DEFAULT_PROVIDER_NAME};
use tracing::{info, warn};

use crate::config::SecuritySettings;
use crate::error::{RotationError, SecurityError, SecurityResult};
use crate::keystore::{crypto, KeyStore, StoreError};
use crate::provider::{location, MasterSecretProvider, ProviderError, ProviderRegistry};
use crate::secret::SecretValue;

pub use persist::SecurityConfigStore;
pub use root_auth::{MasterSecretSource, RootAuthenticationProvider, ADMINISTRATOR_ROLE, ROOT_USERNAME};
pub use rotation::{RotationCoordinator, RotationOutcome, RotationRequest, RotationState};

use rotation::RotationContext;

/// Keystore alias of the key used to encrypt passwords in configuration.
pub const CONFIG_PASSWORD_KEY_ALIAS: &str = "config:password:key";

const KEYSTORE_FILE: &str = "keystore.json";
const DEFAULT_SECRET_FILE: &str = "passwd";
const GENERATED_SECRET_BYTES: usize = 24;

/// Owner of master secret state under one security root.
///
/// Changes take `&mut self`; wrap the manager in a lock to share it.
#[derive(Debug)]
pub struct SecurityManager {
    settings: SecuritySettings,
    config_store: SecurityConfigStore,
    providers: ProviderRegistry,
    master_config: MasterPasswordConfig,
    keystore: KeyStore,
    rotation: RotationCoordinator,
}

impl SecurityManager {
    /// Open (bootstrapping if needed) the security root in `settings`.
    pub fn open(settings: SecuritySettings) -> SecurityResult<Self> {
        Self::open_with(settings, ProviderRegistry::new())
    }

    /// Like [`open`](Self::open), with custom provider implementations
    /// already registered in `providers`.
    pub fn open_with(settings: SecuritySettings, mut providers: ProviderRegistry) -> SecurityResult<Self> {
        let config_store = SecurityConfigStore::new(&settings.root);
        let keystore = KeyStore::file(settings.root.join(KEYSTORE_FILE));

        for config in config_store.load_provider_configs()? {
            let name = config.name.clone();
            if let Err(e) = providers.insert(config) {
                warn!(provider = %name, error = %e, "Skipping unusable master password provider");
            }
        }

        let master_config = match config_store.load_master_config()? {
            Some(config) => config,
            None => bootstrap_default_provider(&settings, &config_store, &mut providers)?,
        };
        if !providers.contains(&master_config.provider_name) {
            return Err(RotationError::ReferenceError {
                name: master_config.provider_name,
            }
            .into());
        }

        let rotation = RotationCoordinator::new(settings.master_password_policy.clone());
        let manager = Self {
            settings,
            config_store,
            providers,
            master_config,
            keystore,
            rotation,
        };
        manager.prepare_keystore()?;

        info!(
            root = %manager.settings.root.display(),
            provider = %manager.master_config.provider_name,
            "Security manager ready"
        );
        Ok(manager)
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    /// The master secret as the active provider holds it right now.
    pub fn master_password(&self) -> SecurityResult<SecretValue> {
        Ok(self.providers.resolve(&self.master_config.provider_name)?.read()?)
    }

    pub fn master_password_config(&self) -> MasterPasswordConfig {
        self.master_config.clone()
    }

    pub fn load_master_password_provider_config(&self, name: &str) -> Option<MasterPasswordProviderConfig> {
        self.providers.config(name).cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.names().map(String::from).collect()
    }

    /// Make a custom provider instance available under implementation
    /// `kind`.
    pub fn register_custom_provider(&mut self, kind: impl Into<String>, provider: Arc<dyn MasterSecretProvider>) {
        self.providers.register_custom(kind, provider);
    }

    /// Validate and save a provider configuration so it can become the
    /// active provider through a master secret change.
    ///
    /// The active provider's configuration cannot be altered here, since
    /// that would swap the master secret outside the change protocol.
    pub fn save_master_password_provider_config(&mut self, config: MasterPasswordProviderConfig) -> SecurityResult<()> {
        if config.name == self.master_config.provider_name
            && self.providers.config(&config.name) != Some(&config)
        {
            return Err(ProviderError::InvalidConfig {
                name: config.name,
                reason: "the active provider can only change through a master secret change".to_string(),
            }
            .into());
        }

        self.providers.validate(&config)?;
        self.config_store.save_provider_config(&config)?;
        info!(provider = %config.name, implementation = %config.implementation, "Saved master password provider config");
        self.providers.insert(config)?;
        Ok(())
    }

    /// Change the master secret and make `config`'s provider the active one.
    ///
    /// The change is staged; [`commit_master_password_change`] finalizes the
    /// keystore.
    ///
    /// [`commit_master_password_change`]: Self::commit_master_password_change
    pub fn save_master_password_config(
        &mut self,
        config: &MasterPasswordConfig,
        current_secret: Option<&str>,
        new_secret: Option<&str>,
        confirm_secret: Option<&str>,
    ) -> Result<RotationOutcome, RotationError> {
        let ctx = RotationContext {
            providers: &self.providers,
            keystore: &self.keystore,
            config_store: &self.config_store,
            master_config: &mut self.master_config,
        };
        self.rotation.change_secret(
            ctx,
            RotationRequest {
                config,
                current_secret,
                new_secret,
                confirm_secret,
            },
        )
    }

    /// Promote the staged keystore. Returns `false` when no change was
    /// staged.
    pub fn commit_master_password_change(&mut self) -> Result<bool, RotationError> {
        self.rotation.commit(&self.keystore)
    }

    pub fn rotation_state(&self) -> RotationState {
        self.rotation.state()
    }

    pub fn has_staged_change(&self) -> SecurityResult<bool> {
        Ok(self.keystore.has_staged()?)
    }

    /// Drop every decrypted keystore value; the store is reopened with the
    /// current master secret on next use.
    ///
    /// Refused while a change is staged: the live store still needs the
    /// previous secret until the change is committed.
    pub fn reload_keystore(&self) -> SecurityResult<()> {
        if self.keystore.has_staged()? {
            return Err(StoreError::ChangePending.into());
        }
        self.keystore.invalidate_cache();
        Ok(())
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    pub fn keystore_entry(&self, alias: &str) -> SecurityResult<Option<SecretValue>> {
        self.ensure_unlocked()?;
        Ok(self.keystore.get(alias)?.map(SecretValue::from))
    }

    pub fn store_keystore_entry(&self, alias: &str, value: &str) -> SecurityResult<()> {
        self.ensure_unlocked()?;
        Ok(self.keystore.set(alias, value)?)
    }

    /// Key protecting passwords stored in configuration files.
    pub fn config_password_key(&self) -> SecurityResult<SecretValue> {
        self.keystore_entry(CONFIG_PASSWORD_KEY_ALIAS)?
            .ok_or_else(|| SecurityError::internal("config password key missing from keystore"))
    }

    fn ensure_unlocked(&self) -> SecurityResult<()> {
        if !self.keystore.is_unlocked() {
            self.keystore.unlock(self.master_password()?.as_bytes())?;
        }
        Ok(())
    }

    /// Settle a change left staged by an earlier run, then make sure the
    /// keystore exists and holds the config password key.
    fn prepare_keystore(&self) -> SecurityResult<()> {
        let secret = self.master_password()?;

        if self.keystore.has_staged()? {
            if self.keystore.staged_opens_with(secret.as_bytes())? {
                info!("Completing master secret change staged before restart");
                self.keystore.commit()?;
            } else {
                warn!("Discarding staged keystore that does not match the master secret");
                self.keystore.restore_staged(None)?;
            }
        }

        self.keystore.initialize(secret.as_bytes())?;
        self.keystore.unlock(secret.as_bytes())?;
        if self.keystore.get(CONFIG_PASSWORD_KEY_ALIAS)?.is_none() {
            self.keystore
                .set(CONFIG_PASSWORD_KEY_ALIAS, &crypto::random_token(32))?;
            info!("Generated config password key");
        }
        Ok(())
    }
}

impl MasterSecretSource for SecurityManager {
    fn master_secret(&self) -> SecurityResult<SecretValue> {
        self.master_password()
    }
}

/// Create the `default` URL provider with its secret file and make it
/// active.
fn bootstrap_default_provider(
    settings: &SecuritySettings,
    config_store: &SecurityConfigStore,
    providers: &mut ProviderRegistry,
) -> SecurityResult<MasterPasswordConfig> {
    let secret_path = config_store
        .provider_dir(DEFAULT_PROVIDER_NAME)
        .join(DEFAULT_SECRET_FILE);
    let provider_config = MasterPasswordProviderConfig::url(
        DEFAULT_PROVIDER_NAME,
        location::file_location(&secret_path)?,
        false,
    );
    providers.insert(provider_config.clone())?;

    if !secret_path.exists() {
        let secret = match &settings.initial_master_secret {
            Some(secret) if !secret.is_empty() => SecretValue::new(secret.as_str()),
            _ => {
                info!(path = %secret_path.display(), "Generated a random master secret");
                SecretValue::from(crypto::random_token(GENERATED_SECRET_BYTES))
            }
        };
        providers.resolve(DEFAULT_PROVIDER_NAME)?.write(&secret)?;
    }

    let master_config = MasterPasswordConfig::new(DEFAULT_PROVIDER_NAME);
    config_store.save_provider_config(&provider_config)?;
    config_store.save_master_config(&master_config)?;
    info!(root = %settings.root.display(), "Bootstrapped security root");
    Ok(master_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_dir;
    use std::fs;

    fn settings(label: &str) -> SecuritySettings {
        SecuritySettings {
            initial_master_secret: Some("geoserver".to_string()),
            ..SecuritySettings::with_root(temp_dir(label))
        }
    }

    #[test]
    fn test_bootstrap_creates_default_provider() {
        let settings = settings("manager-bootstrap");
        let root = settings.root.clone();
        let manager = SecurityManager::open(settings).unwrap();

        assert_eq!(manager.master_password().unwrap().as_str(), "geoserver");
        assert_eq!(manager.master_password_config().provider_name, DEFAULT_PROVIDER_NAME);
        let default = manager
            .load_master_password_provider_config(DEFAULT_PROVIDER_NAME)
            .unwrap();
        assert!(default.location.unwrap().ends_with(DEFAULT_SECRET_FILE));
        assert!(!manager.config_password_key().unwrap().is_empty());
        assert!(root.join(KEYSTORE_FILE).exists());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_reopen_keeps_state() {
        let settings = settings("manager-reopen");
        let root = settings.root.clone();
        let key = SecurityManager::open(settings.clone())
            .unwrap()
            .config_password_key()
            .unwrap();

        let reopened = SecurityManager::open(settings).unwrap();
        assert_eq!(reopened.config_password_key().unwrap().as_str(), key.as_str());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_random_secret_when_none_configured() {
        let settings = SecuritySettings::with_root(temp_dir("manager-random"));
        let root = settings.root.clone();
        let manager = SecurityManager::open(settings).unwrap();
        assert!(manager.master_password().unwrap().len() >= 32);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_active_provider_config_is_frozen() {
        let settings = settings("manager-frozen");
        let root = settings.root.clone();
        let mut manager = SecurityManager::open(settings).unwrap();

        let mut default = manager
            .load_master_password_provider_config(DEFAULT_PROVIDER_NAME)
            .unwrap();
        // saving it unchanged is fine
        manager
            .save_master_password_provider_config(default.clone())
            .unwrap();

        default.read_only = true;
        assert!(matches!(
            manager.save_master_password_provider_config(default),
            Err(SecurityError::Provider(ProviderError::InvalidConfig { .. }))
        ));

        let _ = fs::remove_dir_all(&root);
    }
}
