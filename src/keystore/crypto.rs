//! Cryptographic primitives for the protected keystore.
//!
//! Uses:
//! - HKDF-SHA256 to derive a store key from the master secret and a
//!   per-store salt
//! - ChaCha20-Poly1305 for authenticated encryption of every entry

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

const HKDF_INFO: &[u8] = b"keywarden-keystore-v1";

/// Size of a derived store key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the per-store salt in bytes.
pub const SALT_SIZE: usize = 16;

const NONCE_SIZE: usize = 12;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Decryption failed - invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Invalid nonce length")]
    InvalidNonce,

    #[error("Invalid salt length")]
    InvalidSalt,
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Key derived from the master secret, wiped on drop.
pub struct StoreKey(Zeroizing<[u8; KEY_SIZE]>);

impl StoreKey {
    /// Derive the key for a store sealed with `salt_base64`.
    pub fn derive(secret: &[u8], salt_base64: &str) -> CryptoResult<Self> {
        let salt = BASE64.decode(salt_base64)?;
        if salt.len() != SALT_SIZE {
            return Err(CryptoError::InvalidSalt);
        }

        let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), secret);
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(HKDF_INFO, &mut key[..])
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(Self(key))
    }

    fn cipher(&self) -> CryptoResult<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.0[..]).map_err(|_| CryptoError::KeyDerivation)
    }
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreKey(<redacted>)")
    }
}

/// One encrypted value as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedValue {
    /// ChaCha20-Poly1305 nonce (base64)
    pub nonce: String,
    /// Ciphertext with tag (base64)
    pub ciphertext: String,
}

/// Generate a fresh random salt, base64 encoded.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    BASE64.encode(salt)
}

/// Generate `len` random bytes, base64 encoded.
pub fn random_token(len: usize) -> Zeroizing<String> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(bytes.as_mut_slice());
    Zeroizing::new(BASE64.encode(bytes.as_slice()))
}

/// Encrypt `plaintext` under `key` with a random nonce.
pub fn seal(key: &StoreKey, plaintext: &[u8]) -> CryptoResult<SealedValue> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()?
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(SealedValue {
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Decrypt a sealed value.
pub fn open(key: &StoreKey, sealed: &SealedValue) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let nonce_bytes = BASE64.decode(&sealed.nonce)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonce);
    }
    let ciphertext = BASE64.decode(&sealed.ciphertext)?;

    key.cipher()?
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let salt = generate_salt();
        let key = StoreKey::derive(b"geoserver", &salt).unwrap();

        let sealed = seal(&key, b"Hello, World!").unwrap();
        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"Hello, World!");

        // fresh nonce every time
        let again = seal(&key, b"Hello, World!").unwrap();
        assert_ne!(sealed.nonce, again.nonce);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let salt = generate_salt();
        let key = StoreKey::derive(b"geoserver", &salt).unwrap();
        let sealed = seal(&key, b"payload").unwrap();

        let wrong = StoreKey::derive(b"geoserver1", &salt).unwrap();
        assert!(matches!(open(&wrong, &sealed), Err(CryptoError::DecryptionFailed)));

        // same secret, other salt
        let other_salt = StoreKey::derive(b"geoserver", &generate_salt()).unwrap();
        assert!(open(&other_salt, &sealed).is_err());
    }

    #[test]
    fn test_bad_encodings() {
        assert!(matches!(
            StoreKey::derive(b"x", "AAAA"),
            Err(CryptoError::InvalidSalt)
        ));
        assert!(matches!(
            StoreKey::derive(b"x", "not base64!!!"),
            Err(CryptoError::Base64(_))
        ));

        let key = StoreKey::derive(b"x", &generate_salt()).unwrap();
        let sealed = SealedValue {
            nonce: BASE64.encode([0u8; 4]),
            ciphertext: BASE64.encode(b"junk"),
        };
        assert!(matches!(open(&key, &sealed), Err(CryptoError::InvalidNonce)));
    }

    #[test]
    fn test_random_token_length() {
        let token = random_token(32);
        assert_eq!(BASE64.decode(token.as_bytes()).unwrap().len(), 32);
        assert_ne!(*token, *random_token(32));
    }
}
