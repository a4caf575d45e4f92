//! Manifest entries: one per logical file or symlink.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::path::LogicalPath;

/// Outcome of registering a logical file: whether a fresh entry was created
/// or an existing one was replaced (last writer wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// What the physical blob holds, and how to restore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    /// Ciphered file content.
    Regular,
    /// Symlink whose target lives inside the ingested tree. The target is
    /// stored as a logical path under the ingest mount point and re-anchored
    /// under the destination root at egress time.
    InternalSymlink { target: LogicalPath },
    /// Symlink pointing outside the ingested tree; recreated verbatim.
    ExternalSymlink { target: PathBuf },
}

/// One logical file or symlink in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Original base name.
    pub name: String,
    /// Slash-separated path of the blob relative to the store root
    /// (`<shard>/<token><tag>`).
    pub physical: String,
    #[serde(flatten)]
    pub payload: EntryPayload,
}

impl ManifestEntry {
    /// The blob's path relative to the store root.
    pub fn physical_path(&self) -> PathBuf {
        PathBuf::from(&self.physical)
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.payload, EntryPayload::Regular)
    }

    pub fn is_symlink(&self) -> bool {
        !self.is_regular()
    }
}
