//! Extract command - reconstruct the plaintext tree from a store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use shroud_core::{Egressor, StoreKey};

#[derive(ClapArgs)]
pub struct Args {
    /// Store root to read from
    pub store: PathBuf,

    /// Destination directory for the reconstructed tree
    pub dest: PathBuf,

    /// Worker threads
    #[arg(long, default_value_t = 4)]
    pub threads: usize,
}

#[instrument(level = "info", name = "cmd::extract", skip_all, fields(store = %args.store.display()))]
pub fn execute(args: &Args, key: StoreKey) -> Result<()> {
    let summary = Egressor::new(&args.store, &args.dest, key)
        .with_threads(args.threads)
        .run()
        .with_context(|| format!("failed to extract {}", args.store.display()))?;

    println!(
        "Restored {} entries to {}",
        summary.restored,
        args.dest.display()
    );
    Ok(())
}
