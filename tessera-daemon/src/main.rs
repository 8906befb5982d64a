//! tesserad - attestation and enrollment service
//!
//! Hands out attestation tickets, verifies TPM quotes against them and
//! returns sealed credentials to enrolled hosts.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tessera_daemon::keys::{load_or_create_signer, rotate_ticket_key};
use tessera_daemon::Config;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// tesserad - Tessera attestation service
#[derive(Parser)]
#[command(name = "tesserad", version, about)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon server (default if no command given)
    Serve,

    /// Key management
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Generate a new ticket key; it becomes current on next start
    RotateTicket,
    /// Print the asset signer's verification key (hex)
    Signer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Some(Commands::Keys { action }) => cmd_keys(&config, action),
        Some(Commands::Serve) | None => tessera_daemon::run(config).await,
    }
}

// ============================================================================
// Key Management
// ============================================================================

fn cmd_keys(config: &Config, action: KeyAction) -> anyhow::Result<()> {
    match action {
        KeyAction::RotateTicket => {
            let key = rotate_ticket_key(&config.ticket_key_dir())?;
            println!("{:08x}", key.id());
        }
        KeyAction::Signer => {
            let signer = load_or_create_signer(&config.signer_path())?;
            println!("{}", signer.public_key().to_hex());
        }
    }
    Ok(())
}
