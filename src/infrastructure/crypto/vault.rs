//! AES-256-GCM vault for raw API key secrets.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::domain::{DomainError, EncryptedSecret};

/// 256-bit symmetric key
pub const MASTER_KEY_SIZE: usize = 32;

/// 12-byte nonce for AES-GCM (96 bits is the standard).
pub const NONCE_SIZE: usize = 12;

/// Encrypts and decrypts raw secrets; knows nothing about key records
///
/// There is no fallback: a vault either holds a real AEAD key or cannot be
/// constructed.
pub struct CryptoVault {
    key: Zeroizing<[u8; MASTER_KEY_SIZE]>,
}

impl CryptoVault {
    /// Create a vault with a fresh key from the operating system RNG
    pub fn generate() -> Result<Self, DomainError> {
        let mut key = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        fill_secure(key.as_mut())?;
        Ok(Self { key })
    }

    /// Create a vault from raw key bytes
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, DomainError> {
        if bytes.len() != MASTER_KEY_SIZE {
            return Err(DomainError::configuration(format!(
                "Vault key must be {} bytes, got {}",
                MASTER_KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Create a vault from a standard base64 encoded key
    pub fn from_base64(encoded: &str) -> Result<Self, DomainError> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
            DomainError::configuration(format!("Vault key is not valid base64: {}", e))
        })?);
        Self::from_key_bytes(&bytes)
    }

    /// Produce a new base64 encoded key suitable for `vault.master_key`
    pub fn generate_master_key() -> Result<Zeroizing<String>, DomainError> {
        let mut key = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        fill_secure(key.as_mut())?;
        Ok(Zeroizing::new(STANDARD.encode(key.as_slice())))
    }

    fn cipher(&self) -> Result<Aes256Gcm, DomainError> {
        Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| DomainError::configuration(format!("Invalid vault key: {}", e)))
    }

    /// Encrypt a secret, binding it to `aad`
    pub fn encrypt(&self, plaintext: &str, aad: &str) -> Result<EncryptedSecret, DomainError> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        fill_secure(&mut nonce_bytes)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| DomainError::internal(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedSecret {
            ciphertext: STANDARD.encode(ciphertext),
            nonce: STANDARD.encode(nonce_bytes),
        })
    }

    /// Decrypt a secret previously bound to `aad`
    pub fn decrypt(
        &self,
        encrypted: &EncryptedSecret,
        aad: &str,
    ) -> Result<Zeroizing<String>, DomainError> {
        let ciphertext = STANDARD
            .decode(&encrypted.ciphertext)
            .map_err(|_| DomainError::decryption_failure("Malformed ciphertext"))?;
        let nonce_bytes = STANDARD
            .decode(&encrypted.nonce)
            .map_err(|_| DomainError::decryption_failure("Malformed nonce"))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(DomainError::decryption_failure(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        let plaintext = Zeroizing::new(
            self.cipher()?
                .decrypt(
                    Nonce::from_slice(&nonce_bytes),
                    Payload {
                        msg: &ciphertext,
                        aad: aad.as_bytes(),
                    },
                )
                .map_err(|_| DomainError::decryption_failure("Authentication tag mismatch"))?,
        );

        String::from_utf8(plaintext.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| DomainError::decryption_failure("Plaintext is not valid UTF-8"))
    }

    /// Decrypt then compare in constant time
    pub fn matches(
        &self,
        candidate: &str,
        encrypted: &EncryptedSecret,
        aad: &str,
    ) -> Result<bool, DomainError> {
        let stored = self.decrypt(encrypted, aad)?;
        Ok(bool::from(candidate.as_bytes().ct_eq(stored.as_bytes())))
    }
}

impl std::fmt::Debug for CryptoVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoVault")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn fill_secure(buf: &mut [u8]) -> Result<(), DomainError> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        DomainError::configuration(format!("Secure random source unavailable: {}", e))
    })
}
