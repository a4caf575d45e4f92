//! Add command - ingest a source tree into a store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use shroud_core::{Ingestor, LogicalPath, StoreKey};

#[derive(ClapArgs)]
pub struct Args {
    /// Source directory to ingest
    pub source: PathBuf,

    /// Store root (must be initialized)
    pub store: PathBuf,

    /// Logical directory to attach the ingested tree under
    /// (default: the source directory's name)
    #[arg(long, value_name = "PATH")]
    pub mount_point: Option<String>,

    /// Worker threads
    #[arg(long, default_value_t = 4)]
    pub threads: usize,
}

#[instrument(level = "info", name = "cmd::add", skip_all, fields(source = %args.source.display()))]
pub fn execute(args: &Args, key: StoreKey) -> Result<()> {
    let mut ingestor =
        Ingestor::new(&args.source, &args.store, key).with_threads(args.threads);
    if let Some(raw) = &args.mount_point {
        let mount = LogicalPath::parse(raw)
            .with_context(|| format!("invalid mount point {raw:?}"))?;
        ingestor = ingestor.with_mount_point(mount);
    }

    let summary = ingestor
        .run()
        .with_context(|| format!("failed to ingest {}", args.source.display()))?;

    println!("{} entries processed", summary.processed());
    println!("Added               : {}", summary.added);
    println!("Updated             : {}", summary.updated);
    println!("Non-regular         : {}", summary.non_regular);
    println!("Missing link targets: {}", summary.missing_target);
    println!(
        "Quarantined {} orphaned files, dropped {} dangling entries",
        summary.commit.orphaned, summary.commit.dangling
    );
    Ok(())
}
