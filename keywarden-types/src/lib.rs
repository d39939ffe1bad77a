//! Persisted configuration forms for keywarden.
//!
//! These are the shapes written to and read from the security root. The
//! `keywarden` crate only ever consumes them in parsed form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Implementation name of the built-in URL backed provider.
pub const URL_IMPLEMENTATION: &str = "url";

/// Name of the provider created when a security root is bootstrapped.
pub const DEFAULT_PROVIDER_NAME: &str = "default";

/// Access mode evaluated independently per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub const ALL: [AccessMode; 2] = [AccessMode::Read, AccessMode::Write];

    /// Single letter suffix used in rule properties (`r` / `w`).
    pub fn suffix(self) -> char {
        match self {
            Self::Read => 'r',
            Self::Write => 'w',
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "r" | "R" => Some(Self::Read),
            "w" | "W" => Some(Self::Write),
            _ => None,
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "READ"),
            Self::Write => write!(f, "WRITE"),
        }
    }
}

/// Which implementation backs a master password provider.
///
/// Serialized as a plain string: `"url"` for the built-in provider, anything
/// else names a provider instance registered by the embedding system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderImplementation {
    Url,
    Custom(String),
}

impl From<String> for ProviderImplementation {
    fn from(value: String) -> Self {
        if value == URL_IMPLEMENTATION {
            Self::Url
        } else {
            Self::Custom(value)
        }
    }
}

impl From<ProviderImplementation> for String {
    fn from(value: ProviderImplementation) -> Self {
        match value {
            ProviderImplementation::Url => URL_IMPLEMENTATION.to_string(),
            ProviderImplementation::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for ProviderImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url => f.write_str(URL_IMPLEMENTATION),
            Self::Custom(kind) => f.write_str(kind),
        }
    }
}

/// Saved configuration of one master password provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterPasswordProviderConfig {
    /// Unique provider name
    pub name: String,
    pub implementation: ProviderImplementation,
    /// Read-only providers supply a secret but refuse write-back
    #[serde(default)]
    pub read_only: bool,
    /// Resource locator, used by URL backed providers only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl MasterPasswordProviderConfig {
    pub fn url(name: impl Into<String>, location: impl Into<String>, read_only: bool) -> Self {
        Self {
            name: name.into(),
            implementation: ProviderImplementation::Url,
            read_only,
            location: Some(location.into()),
        }
    }

    pub fn custom(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: ProviderImplementation::Custom(kind.into()),
            read_only: false,
            location: None,
        }
    }
}

/// Which provider is authoritative for the master secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterPasswordConfig {
    pub provider_name: String,
}

impl MasterPasswordConfig {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
        }
    }
}
