use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::authz::AccessRule;

/// Rules new master secrets supplied by an operator must satisfy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MasterPasswordPolicy {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

fn default_min_length() -> usize {
    8
}

impl Default for MasterPasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
        }
    }
}

impl MasterPasswordPolicy {
    /// Why `secret` is not acceptable, if it is not.
    pub fn violation(&self, secret: &str) -> Option<String> {
        let length = secret.chars().count();
        if length < self.min_length {
            return Some(format!(
                "secret has {length} characters, at least {} required",
                self.min_length
            ));
        }
        None
    }
}

/// Master secret and keystore settings
#[derive(Debug, Deserialize, Clone)]
pub struct SecuritySettings {
    /// Directory holding provider configs, the default secret file and the
    /// keystore
    #[serde(default = "default_security_root")]
    pub root: PathBuf,
    /// Master secret written to the default provider when a fresh security
    /// root is bootstrapped. A random one is generated when absent.
    #[serde(default)]
    pub initial_master_secret: Option<String>,
    #[serde(default)]
    pub master_password_policy: MasterPasswordPolicy,
}

fn default_security_root() -> PathBuf {
    PathBuf::from("data/security")
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            root: default_security_root(),
            initial_master_secret: None,
            master_password_policy: MasterPasswordPolicy::default(),
        }
    }
}

impl SecuritySettings {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

/// Resource access rules
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthorizationSettings {
    /// Inline rules
    #[serde(default)]
    pub rules: Vec<AccessRule>,
    /// Properties file with `path.mode=ROLES` lines, applied after the inline
    /// rules
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub authorization: AuthorizationSettings,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: KEYWARDEN_)
            // e.g., KEYWARDEN_SECURITY__ROOT, KEYWARDEN_SECURITY__INITIAL_MASTER_SECRET
            .add_source(
                Environment::with_prefix("KEYWARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
