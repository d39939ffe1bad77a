//! Master secret providers.
//!
//! A provider is where the master secret currently lives. Every variant
//! offers the same `read` / `write` surface:
//!
//! - [`UrlSecretProvider`]: a `file:` location, read-write or read-only
//! - custom providers: any [`MasterSecretProvider`] handed in by the
//!   embedding system through [`ProviderRegistry::register_custom`]

pub mod location;
pub mod registry;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::secret::SecretValue;

pub use location::UrlSecretProvider;
pub use registry::{ProviderRegistry, ResolvedProvider};

/// Provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider '{name}' is read-only")]
    ReadOnly { name: String },

    #[error("Master password provider '{name}' not found")]
    NotFound { name: String },

    #[error("Invalid provider location '{location}': {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported location scheme '{0}', only file URLs are supported")]
    UnsupportedScheme(String),

    #[error("Provider I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Provider location {0} holds no secret")]
    Empty(String),

    #[error("No provider registered for implementation '{0}'")]
    UnknownImplementation(String),

    #[error("Invalid configuration for provider '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Provider failure: {0}")]
    Custom(String),
}

impl ProviderError {
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }
}

/// Source and sink for the master secret.
///
/// Implementations are called from a single rotation at a time but must be
/// shareable across threads.
pub trait MasterSecretProvider: Send + Sync + fmt::Debug {
    /// Current secret held at this provider.
    fn read(&self) -> Result<SecretValue, ProviderError>;

    /// Replace the secret held at this provider.
    fn write(&self, secret: &SecretValue) -> Result<(), ProviderError>;

    /// Read-only providers refuse every `write`.
    fn is_read_only(&self) -> bool {
        false
    }
}
