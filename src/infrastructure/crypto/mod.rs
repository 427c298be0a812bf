//! Secret encryption

mod vault;

pub use vault::{CryptoVault, MASTER_KEY_SIZE, NONCE_SIZE};
