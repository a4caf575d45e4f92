//! The persisted logical-to-physical mapping.
//!
//! The manifest is the authoritative logical namespace over the store's
//! flat, sharded physical layout. It is held in memory as two concurrent
//! maps keyed by full normalized logical path - a directory set and a file
//! map - so parallel ingest tasks registering disjoint (or racing on the
//! same) paths never corrupt the tree; directory listings are materialized
//! on demand. On disk it is a single ciphered JSON document at a well-known
//! name inside the store root.
//!
//! All mutations are memory-resident until [`Manifest::commit`], which
//! persists the document and runs reconciliation against the physical
//! store.

pub mod entry;
pub mod path;

pub use entry::{EntryPayload, ManifestEntry, Upsert};
pub use path::{LogicalPath, PathError};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::crypto::StoreKey;
use crate::reconcile::{self, CommitResult};
use crate::store;

/// Errors from manifest persistence and lookup.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error on manifest at {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// The manifest file exists but does not decode with the given key.
    /// This is fatal: silently substituting an empty manifest would orphan
    /// every previously ingested file on the next reconciliation pass.
    #[error("manifest at {path} is corrupt or keyed differently: {source}")]
    Corrupt {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    #[error("failed to encode manifest: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Path(#[from] PathError),
}

/// On-disk form of the manifest. Logical paths are stored relative and the
/// store root is re-attached at load time, so the whole store is
/// relocatable. Ordered collections keep the ciphered document stable
/// across commits with no intervening mutation.
#[derive(Serialize, Deserialize, Default)]
struct ManifestDoc {
    #[serde(default)]
    dirs: BTreeSet<LogicalPath>,
    #[serde(default)]
    files: BTreeMap<LogicalPath, ManifestEntry>,
}

/// Immediate contents of one logical directory.
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    pub path: LogicalPath,
    /// Child directory names, sorted.
    pub directories: Vec<String>,
    /// Child file entries, sorted by name.
    pub files: Vec<ManifestEntry>,
}

/// The root aggregate: logical directory tree plus file index.
pub struct Manifest {
    root: PathBuf,
    dirs: DashMap<LogicalPath, ()>,
    files: DashMap<LogicalPath, ManifestEntry>,
}

impl Manifest {
    /// A fresh empty manifest rooted at `root`.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: DashMap::new(),
            files: DashMap::new(),
        }
    }

    /// Load the manifest from `<root>/.fs`.
    ///
    /// An absent or empty manifest file yields a fresh empty manifest; a
    /// present file that fails to decode is a hard error.
    #[instrument(level = "debug", skip_all, fields(store = %root.display()))]
    pub fn open(root: &Path, key: &StoreKey) -> Result<Self, ManifestError> {
        let manifest_path = root.join(store::MANIFEST_FILE);
        let mut data = match fs::read(&manifest_path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no manifest file, starting empty");
                return Ok(Self::empty(root));
            }
            Err(source) => {
                return Err(ManifestError::Io {
                    source,
                    path: manifest_path,
                });
            }
        };
        if data.is_empty() {
            debug!("empty manifest file, starting empty");
            return Ok(Self::empty(root));
        }
        key.apply(&mut data);
        let doc: ManifestDoc =
            serde_json::from_slice(&data).map_err(|source| ManifestError::Corrupt {
                source,
                path: manifest_path,
            })?;
        let manifest = Self::from_doc(root, doc);
        info!(files = manifest.file_count(), "manifest loaded");
        Ok(manifest)
    }

    fn from_doc(root: &Path, doc: ManifestDoc) -> Self {
        let manifest = Self::empty(root);
        for dir in doc.dirs {
            manifest.create_directory_if_absent(&dir);
        }
        for (logical, entry) in doc.files {
            if let Some(parent) = logical.parent() {
                manifest.create_directory_if_absent(&parent);
            }
            manifest.files.insert(logical, entry);
        }
        manifest
    }

    fn to_doc(&self) -> ManifestDoc {
        ManifestDoc {
            dirs: self.dirs.iter().map(|r| r.key().clone()).collect(),
            files: self
                .files
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        }
    }

    /// The store root this manifest is attached to. Derived at open, never
    /// persisted.
    pub fn store_root(&self) -> &Path {
        &self.root
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Look up a directory; `None` if any segment is absent. The root
    /// always exists.
    pub fn find_directory(&self, path: &LogicalPath) -> Option<DirectoryListing> {
        if !path.is_root() && !self.dirs.contains_key(path) {
            return None;
        }
        let mut directories: Vec<String> = self
            .dirs
            .iter()
            .filter(|r| r.key().parent().as_ref() == Some(path))
            .filter_map(|r| r.key().file_name().map(str::to_string))
            .collect();
        directories.sort_unstable();
        let mut files: Vec<ManifestEntry> = self
            .files
            .iter()
            .filter(|r| r.key().parent().as_ref() == Some(path))
            .map(|r| r.value().clone())
            .collect();
        files.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Some(DirectoryListing {
            path: path.clone(),
            directories,
            files,
        })
    }

    /// Create `path` and any missing ancestors. Idempotent; safe under
    /// concurrent calls for overlapping paths.
    pub fn create_directory_if_absent(&self, path: &LogicalPath) {
        for ancestor in path.ancestors() {
            self.dirs.entry(ancestor).or_default();
        }
    }

    /// Register or replace a regular-file entry at `parent`/`name`.
    pub fn upsert_file(
        &self,
        parent: &LogicalPath,
        name: &str,
        physical: &Path,
    ) -> Result<Upsert, ManifestError> {
        self.upsert(parent, name, physical, EntryPayload::Regular)
    }

    /// Register or replace a symlink entry at `parent`/`name`. Internal
    /// targets are converted to logical paths (relative to the ingest
    /// root's parent); external targets are kept verbatim.
    pub fn upsert_symlink(
        &self,
        parent: &LogicalPath,
        name: &str,
        physical: &Path,
        target: &Path,
        internal: bool,
    ) -> Result<Upsert, ManifestError> {
        let payload = if internal {
            EntryPayload::InternalSymlink {
                target: LogicalPath::from_fs_path(target)?,
            }
        } else {
            EntryPayload::ExternalSymlink {
                target: target.to_path_buf(),
            }
        };
        self.upsert(parent, name, physical, payload)
    }

    fn upsert(
        &self,
        parent: &LogicalPath,
        name: &str,
        physical: &Path,
        payload: EntryPayload,
    ) -> Result<Upsert, ManifestError> {
        let logical = parent.join(name)?;
        self.create_directory_if_absent(parent);
        let entry = ManifestEntry {
            name: name.to_string(),
            physical: physical_string(physical),
            payload,
        };
        match self.files.insert(logical, entry) {
            Some(_) => Ok(Upsert::Updated),
            None => Ok(Upsert::Created),
        }
    }

    /// Remove a directory and every descendant entry. Returns `false` if
    /// the directory does not exist; the root is not removable.
    pub fn remove_directory(&self, path: &LogicalPath) -> bool {
        if path.is_root() || self.dirs.remove(path).is_none() {
            return false;
        }
        self.dirs.retain(|dir, _| !dir.starts_with(path));
        self.files.retain(|file, _| !file.starts_with(path));
        true
    }

    /// Remove a single file entry. Returns `false` if absent.
    pub fn remove_file(&self, path: &LogicalPath) -> bool {
        self.files.remove(path).is_some()
    }

    /// Every physical path referenced by the manifest, relative to the
    /// store root. Used by reconciliation to tell orphans from live blobs.
    pub fn referenced_physical_paths(&self) -> HashSet<PathBuf> {
        self.files
            .iter()
            .map(|r| r.value().physical_path())
            .collect()
    }

    /// Snapshot of every file entry with its full logical path.
    pub fn entries(&self) -> Vec<(LogicalPath, ManifestEntry)> {
        self.files
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Snapshot of every logical directory.
    pub fn directories(&self) -> Vec<LogicalPath> {
        self.dirs.iter().map(|r| r.key().clone()).collect()
    }

    /// Serialize, cipher, and atomically replace `<root>/.fs`.
    pub fn persist(&self, key: &StoreKey) -> Result<(), ManifestError> {
        let mut data =
            serde_json::to_vec(&self.to_doc()).map_err(|source| ManifestError::Encode { source })?;
        key.apply(&mut data);
        let manifest_path = self.root.join(store::MANIFEST_FILE);
        let io_err = |source| ManifestError::Io {
            source,
            path: manifest_path.clone(),
        };
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(io_err)?;
        tmp.write_all(&data).map_err(io_err)?;
        tmp.persist(&manifest_path).map_err(|e| io_err(e.error))?;
        debug!(bytes = data.len(), "manifest persisted");
        Ok(())
    }

    /// Persist the manifest and reconcile it against the physical store.
    ///
    /// If reconciliation dropped dangling entries, the manifest is
    /// persisted a second time so the repair is durable within this commit.
    #[instrument(level = "info", skip_all, fields(store = %self.root.display()))]
    pub fn commit(&self, key: &StoreKey) -> Result<CommitResult, ManifestError> {
        self.persist(key)?;
        let result = reconcile::reconcile(self);
        if result.dangling > 0 {
            warn!(
                dangling = result.dangling,
                "dropped dangling entries, persisting repaired manifest"
            );
            self.persist(key)?;
        }
        Ok(result)
    }
}

fn physical_string(physical: &Path) -> String {
    physical
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> StoreKey {
        StoreKey::from_passphrase("justdoit").unwrap()
    }

    fn path(raw: &str) -> LogicalPath {
        LogicalPath::parse(raw).unwrap()
    }

    #[test]
    fn upsert_reports_created_then_updated() {
        let manifest = Manifest::empty("/store");
        let parent = path("backup/docs");
        let first = manifest
            .upsert_file(&parent, "a.txt", Path::new("ab/c1.mydat"))
            .unwrap();
        assert_eq!(first, Upsert::Created);
        let second = manifest
            .upsert_file(&parent, "a.txt", Path::new("cd/e2.mydat"))
            .unwrap();
        assert_eq!(second, Upsert::Updated);

        // last writer wins: only the second physical path is referenced
        let referenced = manifest.referenced_physical_paths();
        assert_eq!(referenced.len(), 1);
        assert!(referenced.contains(&PathBuf::from("cd/e2.mydat")));
    }

    #[test]
    fn upsert_materializes_ancestor_directories() {
        let manifest = Manifest::empty("/store");
        manifest
            .upsert_file(&path("a/b/c"), "f", Path::new("ab/cd.mydat"))
            .unwrap();
        assert!(manifest.find_directory(&path("a")).is_some());
        assert!(manifest.find_directory(&path("a/b")).is_some());
        assert!(manifest.find_directory(&path("a/b/c")).is_some());
        assert!(manifest.find_directory(&path("a/x")).is_none());
    }

    #[test]
    fn listing_shows_immediate_children_only() {
        let manifest = Manifest::empty("/store");
        manifest
            .upsert_file(&path("a"), "top.txt", Path::new("aa/1.mydat"))
            .unwrap();
        manifest
            .upsert_file(&path("a/b"), "deep.txt", Path::new("bb/2.mydat"))
            .unwrap();
        let listing = manifest.find_directory(&path("a")).unwrap();
        assert_eq!(listing.directories, vec!["b".to_string()]);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "top.txt");
    }

    #[test]
    fn remove_directory_is_recursive() {
        let manifest = Manifest::empty("/store");
        manifest
            .upsert_file(&path("a/b"), "f1", Path::new("aa/1.mydat"))
            .unwrap();
        manifest
            .upsert_file(&path("a/bc"), "f2", Path::new("bb/2.mydat"))
            .unwrap();

        assert!(manifest.remove_directory(&path("a/b")));
        assert!(manifest.find_directory(&path("a/b")).is_none());
        assert!(!manifest.remove_directory(&path("a/b")));
        // sibling with a shared name prefix is untouched
        assert!(manifest.find_directory(&path("a/bc")).is_some());
        assert_eq!(manifest.file_count(), 1);
        // the root is not removable
        assert!(!manifest.remove_directory(&LogicalPath::root()));
    }

    #[test]
    fn remove_file_reports_absence() {
        let manifest = Manifest::empty("/store");
        manifest
            .upsert_file(&LogicalPath::root(), "f", Path::new("aa/1.mydat"))
            .unwrap();
        assert!(manifest.remove_file(&path("f")));
        assert!(!manifest.remove_file(&path("f")));
    }

    #[test]
    fn persist_then_open_round_trips() {
        let store = TempDir::new().unwrap();
        let manifest = Manifest::empty(store.path());
        manifest.create_directory_if_absent(&path("empty/dir"));
        manifest
            .upsert_file(&path("backup"), "a.txt", Path::new("ab/c1.mydat"))
            .unwrap();
        manifest
            .upsert_symlink(
                &path("backup"),
                "b",
                Path::new("cd/e2.intdat"),
                Path::new("backup/a.txt"),
                true,
            )
            .unwrap();
        manifest
            .upsert_symlink(
                &path("backup"),
                "c",
                Path::new("ef/a3.extdat"),
                Path::new("/etc/hosts"),
                false,
            )
            .unwrap();
        manifest.persist(&key()).unwrap();

        let reloaded = Manifest::open(store.path(), &key()).unwrap();
        assert_eq!(reloaded.file_count(), 3);
        assert_eq!(reloaded.to_doc().dirs, manifest.to_doc().dirs);
        assert_eq!(reloaded.to_doc().files, manifest.to_doc().files);
        assert_eq!(reloaded.store_root(), store.path());
    }

    #[test]
    fn open_missing_or_empty_yields_fresh_manifest() {
        let store = TempDir::new().unwrap();
        let manifest = Manifest::open(store.path(), &key()).unwrap();
        assert_eq!(manifest.file_count(), 0);

        fs::write(store.path().join(store::MANIFEST_FILE), b"").unwrap();
        let manifest = Manifest::open(store.path(), &key()).unwrap();
        assert_eq!(manifest.file_count(), 0);
    }

    #[test]
    fn open_corrupt_manifest_fails_loudly() {
        let store = TempDir::new().unwrap();
        fs::write(store.path().join(store::MANIFEST_FILE), b"not a manifest").unwrap();
        assert!(matches!(
            Manifest::open(store.path(), &key()),
            Err(ManifestError::Corrupt { .. })
        ));
    }

    #[test]
    fn open_with_wrong_key_fails_loudly() {
        let store = TempDir::new().unwrap();
        let manifest = Manifest::empty(store.path());
        manifest
            .upsert_file(&LogicalPath::root(), "f", Path::new("aa/1.mydat"))
            .unwrap();
        manifest.persist(&key()).unwrap();

        let wrong = StoreKey::from_passphrase("wrong").unwrap();
        assert!(matches!(
            Manifest::open(store.path(), &wrong),
            Err(ManifestError::Corrupt { .. })
        ));
    }

    #[test]
    fn manifest_file_is_ciphered_on_disk() {
        let store = TempDir::new().unwrap();
        let manifest = Manifest::empty(store.path());
        manifest
            .upsert_file(&path("backup"), "secret-name.txt", Path::new("aa/1.mydat"))
            .unwrap();
        manifest.persist(&key()).unwrap();

        let raw = fs::read(store.path().join(store::MANIFEST_FILE)).unwrap();
        let raw_text = String::from_utf8_lossy(&raw);
        assert!(!raw_text.contains("secret-name.txt"));
    }
}
