//! Reconciliation between the manifest and the physical store.
//!
//! Runs after every manifest persist. Two independent checks: manifest
//! entries whose physical file is gone (dangling) are dropped from the
//! in-memory manifest, and managed physical files no manifest entry
//! references (orphans) are moved into the quarantine subtree, mirroring
//! their relative path. Orphans are never deleted outright, so an operator
//! can recover from a false positive caused by a race between ingest and
//! reconciliation.
//!
//! Repair never fails the caller's commit: entries that cannot be read or
//! moved are logged and skipped, and only successful repairs are counted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::manifest::Manifest;
use crate::naming;
use crate::store;

/// Summary of one reconciliation pass, reported to the caller. Repairs are
/// not retried automatically; a pass over a consistent store reports zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitResult {
    /// Unreferenced physical files moved to quarantine.
    pub orphaned: usize,
    /// Manifest entries dropped because their physical file is missing.
    pub dangling: usize,
}

/// Reconcile `manifest` against the physical store under its root.
#[instrument(level = "debug", skip_all, fields(store = %manifest.store_root().display()))]
pub fn reconcile(manifest: &Manifest) -> CommitResult {
    let dangling = repair_dangling(manifest);
    let orphaned = quarantine_orphans(manifest);
    debug!(orphaned, dangling, "reconciliation pass complete");
    CommitResult { orphaned, dangling }
}

fn repair_dangling(manifest: &Manifest) -> usize {
    let root = manifest.store_root();
    let mut removed = 0;
    for (logical, entry) in manifest.entries() {
        if root.join(entry.physical_path()).exists() {
            continue;
        }
        warn!(
            file = %logical,
            physical = %entry.physical,
            "entry references a missing physical file, dropping"
        );
        if manifest.remove_file(&logical) {
            removed += 1;
        }
    }
    removed
}

fn quarantine_orphans(manifest: &Manifest) -> usize {
    let root = manifest.store_root();
    let referenced = manifest.referenced_physical_paths();
    let mut moved = 0;
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != store::QUARANTINE_DIR);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "unreadable store entry, skipping");
                continue;
            }
        };
        if entry.file_type().is_dir() || !naming::is_managed(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if referenced.contains(relative) {
            continue;
        }
        match quarantine(root, relative) {
            Ok(dest) => {
                debug!(
                    orphan = %relative.display(),
                    quarantined = %dest.display(),
                    "moved orphan to quarantine"
                );
                moved += 1;
            }
            Err(e) => {
                warn!(
                    orphan = %relative.display(),
                    error = %e,
                    "failed to quarantine orphan, leaving in place"
                );
            }
        }
    }
    moved
}

/// Move one orphan into `<root>/.deleted/<relative>.del`, creating the
/// mirrored parent directories as needed.
fn quarantine(root: &Path, relative: &Path) -> io::Result<PathBuf> {
    let mut dest = root
        .join(store::QUARANTINE_DIR)
        .join(relative)
        .into_os_string();
    dest.push(".");
    dest.push(store::QUARANTINE_SUFFIX);
    let dest = PathBuf::from(dest);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(root.join(relative), &dest)?;
    Ok(dest)
}
