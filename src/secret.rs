//! Secret string handling.

use std::fmt;

use zeroize::Zeroizing;

/// A secret value (master secret, keystore entry).
///
/// Wiped from memory on drop and never printed by `Debug`.
#[derive(Clone, Default)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Compare against `candidate` without leaking where they differ.
    ///
    /// Both sides are hashed with BLAKE3, whose `Hash` equality is constant
    /// time.
    pub fn matches(&self, candidate: &str) -> bool {
        blake3::hash(self.as_bytes()) == blake3::hash(candidate.as_bytes())
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Zeroizing<String>> for SecretValue {
    fn from(value: Zeroizing<String>) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches() {
        let secret = SecretValue::new("geoserver");
        assert!(secret.matches("geoserver"));
        assert!(!secret.matches("geoserver1"));
        assert!(!secret.matches(""));
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretValue::from("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
