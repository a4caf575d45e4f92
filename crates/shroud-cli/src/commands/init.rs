//! Init command - create an empty store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;

#[derive(ClapArgs)]
pub struct Args {
    /// Store directory to initialize (created if absent)
    pub store: PathBuf,
}

pub fn execute(args: &Args) -> Result<()> {
    shroud_core::store::init(&args.store)
        .with_context(|| format!("failed to initialize store at {}", args.store.display()))?;
    println!("Initialized empty store at {}", args.store.display());
    Ok(())
}
