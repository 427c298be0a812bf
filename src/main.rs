use clap::Parser;
use pmp_api_keys::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cli::serve::run().await,
        Command::MasterKey => cli::master_key::run(),
    }
}
