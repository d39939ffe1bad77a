use thiserror::Error;

use crate::authz::manager::RuleFileError;
use crate::keystore::StoreError;
use crate::provider::ProviderError;

/// Master secret change errors
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("Current master secret is required to change it")]
    MissingVerification,

    #[error("Current master secret does not match")]
    AuthenticationFailed,

    #[error("New master secret and confirmation do not match")]
    ConfirmationMismatch,

    #[error("Provider '{provider}' is read-only")]
    ReadOnlyViolation { provider: String },

    #[error("Master password provider '{name}' does not exist")]
    ReferenceError { name: String },

    #[error("Keystore corruption: {0}")]
    StoreCorruption(String),

    #[error("New master secret rejected: {0}")]
    InvalidNewSecret(String),

    #[error("Provider error: {0}")]
    Provider(ProviderError),
}

impl RotationError {
    pub fn store_corruption<S: Into<String>>(msg: S) -> Self {
        Self::StoreCorruption(msg.into())
    }

    pub fn invalid_new_secret<S: Into<String>>(msg: S) -> Self {
        Self::InvalidNewSecret(msg.into())
    }

    /// Whether retrying with different input can succeed without operator
    /// intervention.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingVerification
                | Self::AuthenticationFailed
                | Self::ConfirmationMismatch
                | Self::InvalidNewSecret(_)
                | Self::ReferenceError { .. }
        )
    }
}

impl From<ProviderError> for RotationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::ReadOnly { name } => Self::ReadOnlyViolation { provider: name },
            ProviderError::NotFound { name } => Self::ReferenceError { name },
            other => Self::Provider(other),
        }
    }
}

/// Application-wide error types
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Keystore error: {0}")]
    Store(#[from] StoreError),

    #[error("Access rules error: {0}")]
    Rules(#[from] RuleFileError),

    #[error("Cannot persist security configuration at {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SecurityError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using SecurityError
pub type SecurityResult<T> = Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_map_to_rotation_taxonomy() {
        let err: RotationError = ProviderError::ReadOnly { name: "ro".into() }.into();
        assert!(matches!(err, RotationError::ReadOnlyViolation { ref provider } if provider == "ro"));

        let err: RotationError = ProviderError::NotFound { name: "gone".into() }.into();
        assert!(matches!(err, RotationError::ReferenceError { ref name } if name == "gone"));
        assert!(err.is_input_error());

        let err: RotationError = ProviderError::custom("boom").into();
        assert!(matches!(err, RotationError::Provider(_)));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            RotationError::AuthenticationFailed.to_string(),
            "Current master secret does not match"
        );
        let err = SecurityError::from(RotationError::ConfirmationMismatch);
        assert_eq!(err.to_string(), "New master secret and confirmation do not match");
    }
}
