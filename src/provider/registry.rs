//! Saved provider configurations and the instances behind them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use keywarden_types::{MasterPasswordProviderConfig, ProviderImplementation};
use tracing::{debug, info};

use super::{MasterSecretProvider, ProviderError, UrlSecretProvider};
use crate::secret::SecretValue;

/// Known provider configurations by name, plus custom provider instances by
/// implementation kind.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    configs: BTreeMap<String, MasterPasswordProviderConfig>,
    custom: HashMap<String, Arc<dyn MasterSecretProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a provider instance supplied by the embedding system available
    /// under implementation `kind`.
    pub fn register_custom(&mut self, kind: impl Into<String>, provider: Arc<dyn MasterSecretProvider>) {
        let kind = kind.into();
        info!(kind = %kind, "Registered custom master password provider");
        self.custom.insert(kind, provider);
    }

    /// Check that `config` can be turned into a working provider.
    pub fn validate(&self, config: &MasterPasswordProviderConfig) -> Result<(), ProviderError> {
        if config.name.trim().is_empty() {
            return Err(ProviderError::InvalidConfig {
                name: config.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        self.instantiate(config).map(|_| ())
    }

    /// Add or replace a configuration after validating it.
    pub fn insert(&mut self, config: MasterPasswordProviderConfig) -> Result<(), ProviderError> {
        self.validate(&config)?;
        debug!(provider = %config.name, implementation = %config.implementation, "Provider config registered");
        self.configs.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn config(&self, name: &str) -> Option<&MasterPasswordProviderConfig> {
        self.configs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Provider instance for the configuration called `name`.
    pub fn resolve(&self, name: &str) -> Result<ResolvedProvider, ProviderError> {
        let config = self.configs.get(name).ok_or_else(|| ProviderError::NotFound {
            name: name.to_string(),
        })?;
        Ok(ResolvedProvider {
            config: config.clone(),
            provider: self.instantiate(config)?,
        })
    }

    fn instantiate(&self, config: &MasterPasswordProviderConfig) -> Result<Arc<dyn MasterSecretProvider>, ProviderError> {
        match &config.implementation {
            ProviderImplementation::Url => {
                let location = config
                    .location
                    .as_deref()
                    .filter(|l| !l.trim().is_empty())
                    .ok_or_else(|| ProviderError::InvalidConfig {
                        name: config.name.clone(),
                        reason: "URL provider needs a location".to_string(),
                    })?;
                Ok(Arc::new(UrlSecretProvider::new(
                    config.name.clone(),
                    location,
                    config.read_only,
                )?))
            }
            ProviderImplementation::Custom(kind) => self
                .custom
                .get(kind)
                .cloned()
                .ok_or_else(|| ProviderError::UnknownImplementation(kind.clone())),
        }
    }
}

/// A provider together with the configuration it was built from.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    config: MasterPasswordProviderConfig,
    provider: Arc<dyn MasterSecretProvider>,
}

impl ResolvedProvider {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MasterPasswordProviderConfig {
        &self.config
    }

    /// Read-only if either the configuration or the implementation says so.
    pub fn is_read_only(&self) -> bool {
        self.config.read_only || self.provider.is_read_only()
    }

    pub fn read(&self) -> Result<SecretValue, ProviderError> {
        self.provider.read()
    }

    pub fn write(&self, secret: &SecretValue) -> Result<(), ProviderError> {
        if self.is_read_only() {
            return Err(ProviderError::ReadOnly {
                name: self.config.name.clone(),
            });
        }
        self.provider.write(secret)
    }
}
