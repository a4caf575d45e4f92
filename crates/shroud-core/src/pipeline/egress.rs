//! Egress pipeline: reconstruct the original tree from the store.
//!
//! Walks the persisted manifest, not the physical store: every logical
//! directory is created under the destination, then entries are restored in
//! parallel - regular files are ciphered back to plaintext, internal
//! symlinks are re-anchored under the destination root, external symlinks
//! are recreated verbatim. The first failed task aborts the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::crypto::StoreKey;
use crate::manifest::{EntryPayload, LogicalPath, Manifest, ManifestError, ManifestEntry};
use crate::pipeline::{self, Progress};

/// Optional plaintext post-processing hook, applied to regular file
/// contents after deciphering (identity when absent).
pub type PlaintextTransform = Arc<dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync>;

/// Errors that abort an egress run.
#[derive(Error, Debug)]
pub enum EgressError {
    #[error("IO error restoring {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[cfg(not(unix))]
    #[error("symbolic links are not supported on this platform")]
    SymlinkUnsupported,
}

/// Aggregate counts for one egress run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EgressSummary {
    /// Entries reconstructed under the destination root.
    pub restored: usize,
}

/// Reconstructs the plaintext tree described by a store's manifest.
pub struct Egressor {
    store: PathBuf,
    dest: PathBuf,
    key: StoreKey,
    threads: usize,
    transform: Option<PlaintextTransform>,
}

impl Egressor {
    pub fn new(store: &Path, dest: &Path, key: StoreKey) -> Self {
        Self {
            store: store.to_path_buf(),
            dest: dest.to_path_buf(),
            key,
            threads: pipeline::DEFAULT_WORKERS,
            transform: None,
        }
    }

    /// Worker pool size (explicit, never auto-scaled).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Post-process regular file plaintext before it is written.
    #[must_use]
    pub fn with_transform(mut self, transform: PlaintextTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Run the full pipeline: load the manifest, rebuild directories,
    /// restore every entry.
    #[instrument(
        level = "info",
        skip_all,
        fields(store = %self.store.display(), dest = %self.dest.display())
    )]
    pub fn run(&self) -> Result<EgressSummary, EgressError> {
        let manifest = Manifest::open(&self.store, &self.key)?;

        fs::create_dir_all(&self.dest).map_err(|source| EgressError::Io {
            source,
            path: self.dest.clone(),
        })?;
        for dir in manifest.directories() {
            let path = self.dest.join(dir.to_fs_path());
            fs::create_dir_all(&path).map_err(|source| EgressError::Io { source, path })?;
        }

        let entries = manifest.entries();
        let pool = pipeline::build_pool(self.threads, "egress")?;
        let progress = Progress::new("egress");
        pool.install(|| {
            entries.par_iter().try_for_each(|(logical, entry)| {
                self.restore_entry(logical, entry)?;
                progress.tick();
                Ok::<(), EgressError>(())
            })
        })?;

        debug!(restored = entries.len(), "destination tree reconstructed");
        Ok(EgressSummary {
            restored: entries.len(),
        })
    }

    fn restore_entry(
        &self,
        logical: &LogicalPath,
        entry: &ManifestEntry,
    ) -> Result<(), EgressError> {
        let dest_path = self.dest.join(logical.to_fs_path());
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|source| EgressError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        match &entry.payload {
            EntryPayload::Regular => {
                let physical = self.store.join(entry.physical_path());
                let mut data = fs::read(&physical).map_err(|source| EgressError::Io {
                    source,
                    path: physical,
                })?;
                self.key.apply(&mut data);
                let data = match &self.transform {
                    Some(transform) => transform(data),
                    None => data,
                };
                fs::write(&dest_path, &data).map_err(|source| EgressError::Io {
                    source,
                    path: dest_path,
                })?;
            }
            EntryPayload::InternalSymlink { target } => {
                symlink(&self.dest.join(target.to_fs_path()), &dest_path)?;
            }
            EntryPayload::ExternalSymlink { target } => {
                symlink(target, &dest_path)?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<(), EgressError> {
    std::os::unix::fs::symlink(target, link).map_err(|source| EgressError::Io {
        source,
        path: link.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> Result<(), EgressError> {
    Err(EgressError::SymlinkUnsupported)
}
