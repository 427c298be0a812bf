//! CLI module for PMP API Keys
//!
//! - `serve`: HTTP API with the rotation and anomaly sweeps
//! - `master-key`: print a fresh vault master key

pub mod master_key;
pub mod serve;

use clap::{Parser, Subcommand};

/// PMP API Keys - issue, validate, rotate and revoke API keys
#[derive(Parser)]
#[command(name = "pmp-api-keys")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server and background sweeps
    Serve,

    /// Print a new base64 vault master key
    MasterKey,
}
