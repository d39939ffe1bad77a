pub mod authz;
pub mod config;
pub mod error;
pub mod keystore;
pub mod provider;
pub mod secret;
pub mod security;

#[cfg(test)]
mod testutil;

pub use authz::{AccessMode, AuthorizedRoles, Principal, ResourceAccessManager, SecureTree};
pub use config::AppConfig;
pub use error::{RotationError, SecurityError, SecurityResult};
pub use secret::SecretValue;
pub use security::{RootAuthenticationProvider, RotationState, SecurityManager};
