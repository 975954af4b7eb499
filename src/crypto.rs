//! Token encryption at rest using AES-256-GCM.
//!
//! Access and refresh tokens are sealed into a portable text format
//! `nonce:authTag:encryptedData` (each segment hex-encoded). The 256-bit key is
//! never taken from configuration directly; it is stretched from the configured
//! secret with Argon2id on first use and memoized for the life of the vault.

use std::sync::OnceLock;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::AppConfig;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Secret used when none is configured. Only accepted in local and test profiles.
pub const INSECURE_DEFAULT_SECRET: &str = "calendar-sync-insecure-development-secret";

/// Salt applied to the key derivation unless overridden by configuration.
pub const DEFAULT_KEY_SALT: &str = "calendar-sync.token-vault.v1";

/// Crypto error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid ciphertext format: {0}")]
    InvalidFormat(String),
    #[error("ciphertext failed authentication (tampered data or wrong key)")]
    AuthenticationFailure,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct VaultKey([u8; KEY_LEN]);

#[derive(Zeroize, ZeroizeOnDrop)]
struct VaultSecret(String);

/// Symmetric vault for provider credentials.
pub struct TokenVault {
    secret: VaultSecret,
    salt: String,
    key: OnceLock<VaultKey>,
}

impl std::fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVault")
            .field("salt", &self.salt)
            .field("key_derived", &self.key.get().is_some())
            .finish_non_exhaustive()
    }
}

impl TokenVault {
    pub fn new(secret: impl Into<String>, salt: impl Into<String>) -> Self {
        Self {
            secret: VaultSecret(secret.into()),
            salt: salt.into(),
            key: OnceLock::new(),
        }
    }

    /// Builds a vault from configuration, falling back to the insecure
    /// development secret when none is configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let secret = match config.encryption_secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret.to_string(),
            _ => {
                warn!(
                    profile = %config.profile,
                    "No encryption secret configured; using the insecure development default"
                );
                INSECURE_DEFAULT_SECRET.to_string()
            }
        };
        Self::new(secret, config.encryption_salt.clone())
    }

    /// Encrypts a non-empty plaintext into `nonce:authTag:encryptedData`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::InvalidInput(
                "refusing to encrypt an empty value".to_string(),
            ));
        }

        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let (data, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(data)
        ))
    }

    /// Decrypts a value produced by [`TokenVault::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let segments: Vec<&str> = ciphertext.split(':').collect();
        let [nonce_hex, tag_hex, data_hex] = segments.as_slice() else {
            return Err(CryptoError::InvalidFormat(format!(
                "expected 3 segments (nonce:authTag:encryptedData), found {}",
                segments.len()
            )));
        };

        let nonce_bytes = decode_segment("nonce", nonce_hex)?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidFormat(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;
        let tag = decode_segment("authTag", tag_hex)?;
        if tag.len() != TAG_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "authTag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }
        let mut sealed = decode_segment("encryptedData", data_hex)?;
        sealed.extend_from_slice(&tag);

        let cipher = self.cipher()?;
        let plaintext = cipher
            .decrypt(&Nonce::from(nonce), sealed.as_slice())
            .map_err(|_| CryptoError::AuthenticationFailure)?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::InvalidFormat("plaintext is not valid UTF-8".to_string()))
    }

    /// Like [`TokenVault::decrypt`] but never fails; corrupt or foreign
    /// ciphertext yields `None`.
    pub fn safe_decrypt(&self, ciphertext: &str) -> Option<String> {
        match self.decrypt(ciphertext) {
            Ok(plaintext) => Some(plaintext),
            Err(error) => {
                warn!(error = %error, "Discarding undecryptable token");
                None
            }
        }
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        let key = self.key()?;
        Aes256Gcm::new_from_slice(&key.0)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
    }

    fn key(&self) -> Result<&VaultKey, CryptoError> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let derived = derive_key(&self.secret.0, &self.salt)?;
        Ok(self.key.get_or_init(|| derived))
    }
}

fn derive_key(secret: &str, salt: &str) -> Result<VaultKey, CryptoError> {
    let params = Params::new(
        Params::DEFAULT_M_COST,
        Params::DEFAULT_T_COST,
        Params::DEFAULT_P_COST,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let mut key = [0u8; KEY_LEN];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(VaultKey(key))
}

fn decode_segment(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value).map_err(|e| CryptoError::InvalidFormat(format!("{name} is not hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> &'static TokenVault {
        static VAULT: OnceLock<TokenVault> = OnceLock::new();
        VAULT.get_or_init(|| TokenVault::new("unit-test-secret", DEFAULT_KEY_SALT))
    }

    fn flip_hex_char(value: &str, index: usize) -> String {
        let mut chars: Vec<char> = value.chars().collect();
        chars[index] = if chars[index] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = "ya29.a0AfH6SMBx-access-token";
        let ciphertext = vault().encrypt(plaintext).unwrap();
        assert_eq!(vault().decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_ciphertext_layout() {
        let ciphertext = vault().encrypt("abc").unwrap();
        let segments: Vec<&str> = ciphertext.split(':').collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), NONCE_LEN * 2);
        assert_eq!(segments[1].len(), TAG_LEN * 2);
        assert_eq!(segments[2].len(), 3 * 2);
    }

    #[test]
    fn test_nonce_uniqueness() {
        let first = vault().encrypt("same token").unwrap();
        let second = vault().encrypt("same token").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_plaintext_rejected() {
        assert!(matches!(
            vault().encrypt(""),
            Err(CryptoError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_wrong_segment_count_is_invalid_format() {
        assert!(matches!(
            vault().decrypt("deadbeef:cafebabe"),
            Err(CryptoError::InvalidFormat(_))
        ));
        assert!(matches!(
            vault().decrypt("a:b:c:d"),
            Err(CryptoError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_short_nonce_is_invalid_format() {
        let ciphertext = vault().encrypt("token").unwrap();
        let (_, rest) = ciphertext.split_once(':').unwrap();
        let truncated = format!("00112233:{rest}");
        assert!(matches!(
            vault().decrypt(&truncated),
            Err(CryptoError::InvalidFormat(ref msg)) if msg.contains("nonce must be 12 bytes")
        ));
    }

    #[test]
    fn test_non_hex_segment_is_invalid_format() {
        let ciphertext = vault().encrypt("token").unwrap();
        let broken = ciphertext.replacen(':', ":zz", 1);
        assert!(matches!(
            vault().decrypt(&broken),
            Err(CryptoError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_modified_tag_fails_authentication() {
        let ciphertext = vault().encrypt("refresh-token").unwrap();
        let tag_start = NONCE_LEN * 2 + 1;
        let tampered = flip_hex_char(&ciphertext, tag_start);

        assert_eq!(
            vault().decrypt(&tampered),
            Err(CryptoError::AuthenticationFailure)
        );
        assert_eq!(vault().safe_decrypt(&tampered), None);
    }

    #[test]
    fn test_modified_ciphertext_fails_authentication() {
        let ciphertext = vault().encrypt("refresh-token").unwrap();
        let last = ciphertext.len() - 1;
        let tampered = flip_hex_char(&ciphertext, last);

        assert_eq!(
            vault().decrypt(&tampered),
            Err(CryptoError::AuthenticationFailure)
        );
        assert_eq!(vault().safe_decrypt(&tampered), None);
    }

    #[test]
    fn test_vault_with_other_secret_cannot_decrypt() {
        let ciphertext = vault().encrypt("token").unwrap();
        let other = TokenVault::new("another-secret", DEFAULT_KEY_SALT);
        assert_eq!(
            other.decrypt(&ciphertext),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_vaults_sharing_a_secret_interoperate() {
        let ciphertext = vault().encrypt("portable").unwrap();
        let twin = TokenVault::new("unit-test-secret", DEFAULT_KEY_SALT);
        assert_eq!(twin.decrypt(&ciphertext).unwrap(), "portable");
    }

    #[test]
    fn test_key_is_derived_once() {
        let first = vault().key().unwrap() as *const VaultKey;
        let second = vault().key().unwrap() as *const VaultKey;
        assert_eq!(first, second);
    }

    #[test]
    fn test_short_salt_is_rejected() {
        let vault = TokenVault::new("secret", "short");
        assert!(matches!(
            vault.encrypt("token"),
            Err(CryptoError::KeyDerivation(_))
        ));
    }
}
