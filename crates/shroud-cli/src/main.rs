#![deny(unsafe_code)]

mod commands;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shroud_core::StoreKey;

use crate::commands::{add, extract, init, shell};

/// Command-line interface for shroud encrypted backup stores
#[derive(Parser)]
#[command(name = "shroud")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Initialize a store
    shroud init ~/locked

    # Ingest a directory tree (pipe passphrase from the environment)
    SHROUD_PASSWORD=$SECRET shroud add ~/documents ~/locked --threads 8

    # Reconstruct the plaintext tree
    shroud extract ~/locked ~/restored

    # Browse and edit the manifest interactively
    shroud shell ~/locked
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Store passphrase (insecure, prefer SHROUD_PASSWORD or the prompt)
    #[arg(long, env = "SHROUD_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an empty store
    Init(init::Args),

    /// Ingest a source tree into a store
    Add(add::Args),

    /// Reconstruct the plaintext tree from a store
    Extract(extract::Args),

    /// Browse and edit a store's manifest interactively
    Shell(shell::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    match &cli.command {
        Commands::Init(args) => init::execute(args),
        Commands::Add(args) => {
            let key = store_key(cli.password.as_deref())?;
            add::execute(args, key)
        }
        Commands::Extract(args) => {
            let key = store_key(cli.password.as_deref())?;
            extract::execute(args, key)
        }
        Commands::Shell(args) => {
            let key = store_key(cli.password.as_deref())?;
            shell::execute(args, &key)
        }
    }
}

/// Build the store key from `--password`/`SHROUD_PASSWORD`, falling back to
/// an interactive prompt.
fn store_key(password: Option<&str>) -> Result<StoreKey> {
    let passphrase = match password {
        Some(p) => p.to_string(),
        None => rpassword::prompt_password("Passphrase: ")?,
    };
    Ok(StoreKey::from_passphrase(&passphrase)?)
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
