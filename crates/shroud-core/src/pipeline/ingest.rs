//! Ingest pipeline: walk a source tree into the store.
//!
//! Discovery is a sequential walk feeding one task per non-directory entry
//! into the worker pool. Each task classifies its entry, reserves a unique
//! physical slot, ciphers the payload into it, and registers the entry in
//! the manifest. Recoverable per-entry conditions (non-regular sources,
//! symlinks whose target vanished) become status values; the first real
//! error aborts the whole run. Already-written blobs are deliberately left
//! behind on abort - reconciliation quarantines them on the next commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::iter::{ParallelBridge, ParallelIterator};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::crypto::StoreKey;
use crate::manifest::{LogicalPath, Manifest, ManifestError, PathError, Upsert};
use crate::naming::{self, EntryType, NamingError};
use crate::pipeline::{self, Progress};
use crate::reconcile::CommitResult;

/// Errors that abort an ingest run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error ingesting {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("cannot map {path} into the manifest: {source}")]
    Path {
        #[source]
        source: PathError,
        path: PathBuf,
    },

    #[error("cannot derive a mount point from source root {0}, pass one explicitly")]
    NoMountPoint(PathBuf),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-entry outcome of an ingest task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// Fresh manifest entry.
    Added,
    /// Replaced an existing entry for the same logical path.
    Updated,
    /// Device file, socket, FIFO, ... - not stored.
    NonRegular,
    /// Symlink whose OS-level target does not exist.
    MissingTarget,
}

/// Aggregate counts for one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub added: usize,
    pub updated: usize,
    pub non_regular: usize,
    pub missing_target: usize,
    /// Result of the reconciliation pass run by the final commit.
    pub commit: CommitResult,
}

impl IngestSummary {
    /// Total entries processed, including skipped ones.
    pub fn processed(&self) -> usize {
        self.added + self.updated + self.non_regular + self.missing_target
    }
}

/// Walks a source tree, ciphers every storable entry into the store, and
/// commits the updated manifest.
pub struct Ingestor {
    source: PathBuf,
    store: PathBuf,
    key: StoreKey,
    mount_point: Option<LogicalPath>,
    threads: usize,
}

impl Ingestor {
    pub fn new(source: &Path, store: &Path, key: StoreKey) -> Self {
        Self {
            source: source.to_path_buf(),
            store: store.to_path_buf(),
            key,
            mount_point: None,
            threads: pipeline::DEFAULT_WORKERS,
        }
    }

    /// Worker pool size (explicit, never auto-scaled).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Logical directory the ingested tree is attached under. Defaults to
    /// the source root's base name, mirroring the source's own position.
    #[must_use]
    pub fn with_mount_point(mut self, mount_point: LogicalPath) -> Self {
        self.mount_point = Some(mount_point);
        self
    }

    /// Run the full pipeline: walk, cipher, register, commit.
    #[instrument(
        level = "info",
        skip_all,
        fields(source = %self.source.display(), store = %self.store.display())
    )]
    pub fn run(&self) -> Result<IngestSummary, IngestError> {
        let source = canonical(&self.source)?;
        let store = canonical(&self.store)?;
        let manifest = Manifest::open(&store, &self.key)?;

        let mount = match &self.mount_point {
            Some(mount) => mount.clone(),
            None => default_mount_point(&source)?,
        };

        let pool = pipeline::build_pool(self.threads, "ingest")?;
        let progress = Progress::new("ingest");
        let ctx = TaskContext {
            source: &source,
            store: &store,
            mount: &mount,
            manifest: &manifest,
            key: &self.key,
        };

        let statuses: Vec<IngestStatus> = pool.install(|| {
            WalkDir::new(&source)
                .follow_links(false)
                .into_iter()
                .par_bridge()
                .map(|entry| -> Result<Option<IngestStatus>, IngestError> {
                    let entry = entry?;
                    if entry.file_type().is_dir() {
                        return Ok(None);
                    }
                    let status = process_entry(entry.path(), &ctx)?;
                    progress.tick();
                    Ok(Some(status))
                })
                .filter_map(Result::transpose)
                .collect::<Result<Vec<_>, IngestError>>()
        })?;

        let mut summary = tally(&statuses);
        debug!(processed = statuses.len(), "source walk complete");
        summary.commit = manifest.commit(&self.key)?;
        Ok(summary)
    }
}

/// Shared, read-only state every ingest task borrows.
struct TaskContext<'a> {
    source: &'a Path,
    store: &'a Path,
    mount: &'a LogicalPath,
    manifest: &'a Manifest,
    key: &'a StoreKey,
}

fn process_entry(path: &Path, ctx: &TaskContext<'_>) -> Result<IngestStatus, IngestError> {
    let entry_type = naming::classify(path, ctx.source)?;
    if entry_type == EntryType::NonRegular {
        warn!(path = %path.display(), "skipping non-regular source entry");
        return Ok(IngestStatus::NonRegular);
    }

    // Reserve the physical name before producing the payload; creation is
    // atomic, so concurrent tasks can never land on the same slot.
    let slot = naming::reserve_unique(ctx.store, entry_type)?;
    let (parent, name) = logical_location(path, ctx)?;

    let upsert = if entry_type == EntryType::Regular {
        let mut data = fs::read(path).map_err(|source| IngestError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        ctx.key.apply(&mut data);
        fs::write(&slot.absolute, &data).map_err(|source| IngestError::Io {
            source,
            path: slot.absolute.clone(),
        })?;
        ctx.manifest.upsert_file(&parent, &name, &slot.relative)?
    } else {
        // The OS-level target may have vanished between discovery and now;
        // a dangling source symlink is a recoverable per-entry condition.
        let real = match fs::canonicalize(path) {
            Ok(real) => real,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "symlink target does not exist, skipping");
                return Ok(IngestStatus::MissingTarget);
            }
            Err(source) => {
                return Err(IngestError::Io {
                    source,
                    path: path.to_path_buf(),
                });
            }
        };
        let internal = real.starts_with(ctx.source);
        let stored_target = if internal {
            // Stored relative to the mount (the source root's logical
            // position), so the link can be re-anchored under any
            // destination root at egress time.
            let inside = real
                .strip_prefix(ctx.source)
                .expect("internal targets live under the source root");
            let inside = LogicalPath::from_fs_path(inside).map_err(|source| IngestError::Path {
                source,
                path: path.to_path_buf(),
            })?;
            ctx.mount.concat(&inside).to_fs_path()
        } else {
            real
        };
        let target_str = stored_target.to_str().ok_or_else(|| IngestError::Path {
            source: PathError::NonUtf8(stored_target.clone()),
            path: path.to_path_buf(),
        })?;
        // The blob payload is the ciphered target string, so a sweep can
        // classify and recover link targets without the manifest.
        let mut data = target_str.as_bytes().to_vec();
        ctx.key.apply(&mut data);
        fs::write(&slot.absolute, &data).map_err(|source| IngestError::Io {
            source,
            path: slot.absolute.clone(),
        })?;
        ctx.manifest
            .upsert_symlink(&parent, &name, &slot.relative, &stored_target, internal)?
    };

    Ok(match upsert {
        Upsert::Created => IngestStatus::Added,
        Upsert::Updated => IngestStatus::Updated,
    })
}

/// Manifest location for a source entry: `mount/<relative parent>` + name.
fn logical_location(
    path: &Path,
    ctx: &TaskContext<'_>,
) -> Result<(LogicalPath, String), IngestError> {
    let relative = path
        .strip_prefix(ctx.source)
        .expect("walked entries live under the source root");
    let map_err = |source| IngestError::Path {
        source,
        path: path.to_path_buf(),
    };
    let name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| map_err(PathError::NonUtf8(relative.to_path_buf())))?
        .to_string();
    let parent_rel = relative.parent().unwrap_or_else(|| Path::new(""));
    let parent = LogicalPath::from_fs_path(parent_rel).map_err(map_err)?;
    Ok((ctx.mount.concat(&parent), name))
}

fn default_mount_point(source: &Path) -> Result<LogicalPath, IngestError> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IngestError::NoMountPoint(source.to_path_buf()))?;
    LogicalPath::root().join(name).map_err(|source| IngestError::Path {
        source,
        path: PathBuf::from(name),
    })
}

fn canonical(path: &Path) -> Result<PathBuf, IngestError> {
    fs::canonicalize(path).map_err(|source| IngestError::Io {
        source,
        path: path.to_path_buf(),
    })
}

fn tally(statuses: &[IngestStatus]) -> IngestSummary {
    let mut summary = IngestSummary::default();
    for status in statuses {
        match status {
            IngestStatus::Added => summary.added += 1,
            IngestStatus::Updated => summary.updated += 1,
            IngestStatus::NonRegular => summary.non_regular += 1,
            IngestStatus::MissingTarget => summary.missing_target += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_status() {
        let summary = tally(&[
            IngestStatus::Added,
            IngestStatus::Added,
            IngestStatus::Updated,
            IngestStatus::NonRegular,
            IngestStatus::MissingTarget,
        ]);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.non_regular, 1);
        assert_eq!(summary.missing_target, 1);
        assert_eq!(summary.processed(), 5);
    }

    #[test]
    fn default_mount_point_is_source_base_name() {
        let mount = default_mount_point(Path::new("/home/user/bup")).unwrap();
        assert_eq!(mount.as_str(), "bup");
        assert!(default_mount_point(Path::new("/")).is_err());
    }
}
