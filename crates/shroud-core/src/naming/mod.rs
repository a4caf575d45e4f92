//! Physical naming scheme for store entries.
//!
//! Every stored blob lives at `<shard>/<token><tag>` under the store root:
//! a 128-bit random token rendered as 32 hex characters, split into a
//! two-character shard directory (git-style fan-out bound) and the remainder
//! as the file name, suffixed with a type tag. The tag distinguishes regular
//! payloads from the two symlink kinds without consulting the manifest.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

/// Length of the shard directory prefix taken from the token.
pub const SHARD_LEN: usize = 2;

/// Attempts to reserve a fresh token before giving up. Random collisions in
/// a 128-bit space are vanishingly rare; exhausting the retries indicates a
/// broken entropy source or a misconfigured store.
const RESERVE_ATTEMPTS: u32 = 32;

/// Classification of a filesystem entry for storage purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file; payload is the ciphered file content.
    Regular,
    /// Symlink whose target lies inside the tree being ingested.
    InternalSymlink,
    /// Symlink whose target lies outside the tree being ingested.
    ExternalSymlink,
    /// Device file, socket, FIFO, ... - never stored.
    NonRegular,
}

impl EntryType {
    /// The extension embedded in physical names for this type.
    /// `NonRegular` entries are never stored and have no tag.
    pub const fn tag(self) -> Option<&'static str> {
        match self {
            EntryType::Regular => Some("mydat"),
            EntryType::InternalSymlink => Some("intdat"),
            EntryType::ExternalSymlink => Some("extdat"),
            EntryType::NonRegular => None,
        }
    }
}

/// Errors from name generation and reservation.
#[derive(Error, Debug)]
pub enum NamingError {
    #[error("operation not permitted for non-regular entries")]
    NonRegular,

    /// Retries ran out without finding a free name.
    #[error("could not reserve a unique physical name under {store} after {attempts} attempts")]
    TokenSpaceExhausted { store: PathBuf, attempts: u32 },

    #[error("IO error at {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// A freshly reserved physical slot. The file at `absolute` exists and is
/// empty; the reservation prevents concurrent allocators from racing onto
/// the same name.
#[derive(Debug)]
pub struct ReservedSlot {
    /// Path relative to the store root (`<shard>/<token><tag>`).
    pub relative: PathBuf,
    /// Absolute path of the reserved file.
    pub absolute: PathBuf,
}

/// Generate a random physical name (`<32 hex chars>.<tag>`) for a storable
/// entry type.
pub fn random_physical_name(entry_type: EntryType) -> Result<String, NamingError> {
    let Some(tag) = entry_type.tag() else {
        return Err(NamingError::NonRegular);
    };
    Ok(format!("{}.{tag}", Uuid::new_v4().simple()))
}

/// Split a physical name into its sharded relative path.
pub fn shard_relative_path(name: &str) -> PathBuf {
    let (shard, rest) = name.split_at(SHARD_LEN);
    PathBuf::from(shard).join(rest)
}

/// Classify a filesystem entry relative to `root`.
///
/// Symbolic links are resolved one level: a relative link target is made
/// absolute against the link's parent directory, and a target under `root`
/// classifies as internal. The target is not required to exist.
pub fn classify(path: &Path, root: &Path) -> Result<EntryType, NamingError> {
    let metadata = fs::symlink_metadata(path).map_err(|source| NamingError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(path).map_err(|source| NamingError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let resolved = if target.is_absolute() {
            target
        } else {
            path.parent().unwrap_or_else(|| Path::new("")).join(target)
        };
        if resolved.starts_with(root) {
            Ok(EntryType::InternalSymlink)
        } else {
            Ok(EntryType::ExternalSymlink)
        }
    } else if metadata.is_file() {
        Ok(EntryType::Regular)
    } else {
        Ok(EntryType::NonRegular)
    }
}

/// Reserve a unique physical path under `store_root`.
///
/// Loops generating fresh names and creating the file with `create_new`,
/// which atomically fails if a concurrent allocator (or a leftover blob)
/// already holds the name. The created file is empty; the caller writes the
/// payload into it.
pub fn reserve_unique(store_root: &Path, entry_type: EntryType) -> Result<ReservedSlot, NamingError> {
    for _ in 0..RESERVE_ATTEMPTS {
        let name = random_physical_name(entry_type)?;
        let relative = shard_relative_path(&name);
        let absolute = store_root.join(&relative);
        let shard_dir = store_root.join(&name[..SHARD_LEN]);
        fs::create_dir_all(&shard_dir).map_err(|source| NamingError::Io {
            source,
            path: shard_dir.clone(),
        })?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&absolute)
        {
            Ok(_) => return Ok(ReservedSlot { relative, absolute }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                trace!(name, "physical name collision, retrying");
            }
            Err(source) => {
                return Err(NamingError::Io {
                    source,
                    path: absolute,
                });
            }
        }
    }
    Err(NamingError::TokenSpaceExhausted {
        store: store_root.to_path_buf(),
        attempts: RESERVE_ATTEMPTS,
    })
}

/// Whether `path` carries one of the store's type tags. Unmanaged files
/// (the manifest, quarantined blobs, stray temp files) never match.
pub fn is_managed(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "mydat" | "intdat" | "extdat"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn random_name_has_token_and_tag() {
        let name = random_physical_name(EntryType::Regular).unwrap();
        let (token, tag) = name.split_once('.').unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(tag, "mydat");

        let link = random_physical_name(EntryType::InternalSymlink).unwrap();
        assert!(link.ends_with(".intdat"));
        let ext = random_physical_name(EntryType::ExternalSymlink).unwrap();
        assert!(ext.ends_with(".extdat"));
    }

    #[test]
    fn non_regular_has_no_name() {
        assert!(matches!(
            random_physical_name(EntryType::NonRegular),
            Err(NamingError::NonRegular)
        ));
    }

    #[test]
    fn shard_path_splits_token() {
        let rel = shard_relative_path("abcdef.mydat");
        assert_eq!(rel, PathBuf::from("ab").join("cdef.mydat"));
    }

    #[test]
    fn reserve_creates_empty_file() {
        let store = TempDir::new().unwrap();
        let slot = reserve_unique(store.path(), EntryType::Regular).unwrap();
        assert!(slot.absolute.exists());
        assert_eq!(fs::read(&slot.absolute).unwrap().len(), 0);
        assert_eq!(store.path().join(&slot.relative), slot.absolute);
        assert!(is_managed(&slot.absolute));
    }

    #[test]
    fn classify_regular_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"data").unwrap();
        assert_eq!(classify(&file, dir.path()).unwrap(), EntryType::Regular);
    }

    #[cfg(unix)]
    #[test]
    fn classify_symlinks_by_target_location() {
        let dir = TempDir::new().unwrap();
        let inside = dir.path().join("inside.txt");
        fs::write(&inside, b"x").unwrap();

        let internal = dir.path().join("internal");
        std::os::unix::fs::symlink("inside.txt", &internal).unwrap();
        assert_eq!(
            classify(&internal, dir.path()).unwrap(),
            EntryType::InternalSymlink
        );

        let external = dir.path().join("external");
        std::os::unix::fs::symlink("/etc/hosts", &external).unwrap();
        assert_eq!(
            classify(&external, dir.path()).unwrap(),
            EntryType::ExternalSymlink
        );
    }

    #[cfg(unix)]
    #[test]
    fn classify_socket_as_non_regular() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("ipc.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&sock).unwrap();
        assert_eq!(classify(&sock, dir.path()).unwrap(), EntryType::NonRegular);
    }

    #[test]
    fn unmanaged_files_are_rejected() {
        assert!(!is_managed(Path::new(".fs")));
        assert!(!is_managed(Path::new("ab/cdef.mydat.del")));
        assert!(!is_managed(Path::new("notes.txt")));
        assert!(is_managed(Path::new("ab/cdef.intdat")));
    }
}
