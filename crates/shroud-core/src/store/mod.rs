//! Store layout and initialization.
//!
//! A store root holds the sharded blob directories, the manifest file, and
//! the quarantine subtree. The fixed names here are the only unmanaged
//! paths reconciliation must know about.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// Well-known manifest file name at the store root.
pub const MANIFEST_FILE: &str = ".fs";

/// Quarantine subtree for orphaned blobs. The suffix keeps quarantined
/// files out of the naming scheme's managed extensions.
pub const QUARANTINE_DIR: &str = ".deleted";
pub const QUARANTINE_SUFFIX: &str = "del";

/// Errors from store initialization.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store at {0} is already initialized")]
    AlreadyInitialized(PathBuf),

    #[error("IO error initializing store at {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Initialize an empty store: create the root directory (and parents) and
/// an empty manifest file. Fails if the store already holds a manifest.
pub fn init(root: &Path) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        source,
        path: root.to_path_buf(),
    };
    fs::create_dir_all(root).map_err(io_err)?;
    let manifest = root.join(MANIFEST_FILE);
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&manifest)
    {
        Ok(_) => {
            info!(store = %root.display(), "store initialized");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(StoreError::AlreadyInitialized(root.to_path_buf()))
        }
        Err(source) => Err(io_err(source)),
    }
}
