//! Master key command - prints a key for `vault.master_key`

use crate::infrastructure::crypto::CryptoVault;

pub fn run() -> anyhow::Result<()> {
    let key = CryptoVault::generate_master_key()?;
    println!("{}", key.as_str());

    Ok(())
}
