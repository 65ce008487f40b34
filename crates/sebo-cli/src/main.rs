//! Sebo CLI
//!
//! Pair with contacts by exchanging public keys out-of-band, then encrypt
//! and decrypt short text messages for them.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use sebo_cli::config::{BackingChoice, CliConfig};
use sebo_cli::contact_cmd::{self, ContactAction};
use sebo_cli::key_cmd::{self, KeyAction};
use sebo_cli::message_cmd::{self, MessageArgs};
use sebo_cli::tracing_init::{DEFAULT_FILTER, init_tracing};
use sebo_crypto::{CryptoContext, CryptoError};

#[derive(Parser, Debug)]
#[command(name = "sebo")]
#[command(version, about = "Pairwise end-to-end encrypted text", long_about = None)]
struct Cli {
    /// Directory holding keys and the contact store (default ~/.sebo).
    #[arg(long, global = true, env = "SEBO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Where long-term keys are kept.
    #[arg(long, global = true, env = "SEBO_BACKING", value_enum)]
    backing: Option<BackingChoice>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// This device's public key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Manage contacts.
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },
    /// Encrypt text for the active (or given) contact.
    Encrypt(MessageArgs),
    /// Decrypt text from the active (or given) contact.
    Decrypt(MessageArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(DEFAULT_FILTER, cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting sebo CLI");

    let mut config = CliConfig::load();
    let context_config = config.resolve(cli.data_dir, cli.backing)?;
    debug!(data_dir = %context_config.data_dir.display(), "opening crypto context");
    let mut ctx = CryptoContext::open(&context_config).map_err(|e| match e {
        CryptoError::StorageUnavailable(_) => anyhow::Error::from(e)
            .context("Key storage is unreadable; unlock the system keychain and retry"),
        other => other.into(),
    })?;

    if let Some(id) = config.active_contact.as_deref()
        && let Err(e) = ctx.select(id)
    {
        debug!(id, error = %e, "remembered contact is gone");
    }

    let mut out = io::stdout().lock();
    match cli.command {
        Commands::Key { action } => key_cmd::run(&action, &ctx, &mut out)?,
        Commands::Contact { action } => contact_cmd::run(action, &mut ctx, &mut out)?,
        Commands::Encrypt(args) => message_cmd::encrypt(args, &ctx, &mut out)?,
        Commands::Decrypt(args) => message_cmd::decrypt(args, &ctx, &mut out)?,
    }
    out.flush()?;

    let active = ctx.active_contact().map(|c| c.id.clone());
    if active != config.active_contact {
        config.active_contact = active;
        config.save()?;
    }
    Ok(())
}
