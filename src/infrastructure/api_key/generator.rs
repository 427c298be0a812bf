//! API Key generation
//!
//! Generates cryptographically secure raw secrets with a fixed, greppable
//! prefix, plus the non-secret values stored alongside the ciphertext.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::domain::DomainError;

/// Number of random characters folded into the locator
const LOCATOR_CHARS: usize = 8;

/// Result of generating a new raw secret
pub struct GeneratedSecret {
    /// The full secret (only shown once at creation)
    pub secret: Zeroizing<String>,
    /// Display fragment: first 8 + last 4 characters
    pub preview: String,
    /// Lookup value derived from the public prefix
    pub locator: String,
}

impl std::fmt::Debug for GeneratedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedSecret")
            .field("secret", &"[REDACTED]")
            .field("preview", &self.preview)
            .field("locator", &self.locator)
            .finish()
    }
}

/// Generator for secure API key secrets
#[derive(Debug, Clone)]
pub struct ApiKeyGenerator {
    /// Prefix for all generated keys (e.g., "pk_live_", "pk_test_")
    prefix: String,
    /// Number of random bytes to generate
    key_bytes: usize,
}

impl ApiKeyGenerator {
    /// Create a new API key generator
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            key_bytes: 32,
        }
    }

    /// Create a generator for production keys
    pub fn production() -> Self {
        Self::new("pk_live_")
    }

    /// Create a generator for test keys
    pub fn test() -> Self {
        Self::new("pk_test_")
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generate a new raw secret from the operating system RNG
    ///
    /// Fails instead of falling back to a weaker source when the OS RNG is
    /// unavailable.
    pub fn generate(&self) -> Result<GeneratedSecret, DomainError> {
        let mut random_bytes = Zeroizing::new(vec![0u8; self.key_bytes]);
        OsRng.try_fill_bytes(&mut random_bytes).map_err(|e| {
            DomainError::configuration(format!("Secure random source unavailable: {}", e))
        })?;

        let encoded = Zeroizing::new(URL_SAFE_NO_PAD.encode(random_bytes.as_slice()));
        let secret = Zeroizing::new(format!("{}{}", self.prefix, encoded.as_str()));

        Ok(self.describe(secret))
    }

    /// Build a secret from a known random portion (for testing purposes)
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn from_secret(&self, random_part: &str) -> GeneratedSecret {
        self.describe(Zeroizing::new(format!("{}{}", self.prefix, random_part)))
    }

    fn describe(&self, secret: Zeroizing<String>) -> GeneratedSecret {
        let preview = preview(&secret);
        let locator = self
            .locator_for(&secret)
            .unwrap_or_else(|| hash_locator(secret.as_str()));

        GeneratedSecret {
            secret,
            preview,
            locator,
        }
    }

    /// Derive the locator of a presented secret
    ///
    /// Returns `None` for strings that do not carry this generator's prefix
    /// followed by at least the locator characters.
    pub fn locator_for(&self, candidate: &str) -> Option<String> {
        let random_part = candidate.strip_prefix(self.prefix.as_str())?;
        let head = random_part.get(..LOCATOR_CHARS)?;

        Some(hash_locator(&format!("{}{}", self.prefix, head)))
    }
}

impl Default for ApiKeyGenerator {
    fn default() -> Self {
        Self::production()
    }
}

fn hash_locator(public_part: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_part.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// First 8 and last 4 characters of a secret
pub fn preview(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();

    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
