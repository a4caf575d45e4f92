//! Normalized logical paths for the manifest namespace.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors from logical path construction.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("segment {0:?} is not valid in a logical path")]
    InvalidSegment(String),

    #[error("logical paths must be relative, got {0:?}")]
    NotRelative(String),

    #[error("path {0:?} is not valid UTF-8")]
    NonUtf8(PathBuf),
}

/// A normalized, slash-separated path relative to the store root.
///
/// The empty path is the root. Segments are non-empty, never `.` or `..`,
/// and never contain `/`. Logical paths are the manifest's only addressing
/// convention; absolute filesystem paths are derived from them by joining
/// onto a root directory, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// The store root.
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a slash-separated path, normalizing duplicate and leading
    /// slashes away. `.` and `..` segments are rejected.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let mut out = Self::root();
        for segment in raw.split('/') {
            if segment.is_empty() {
                continue;
            }
            out = out.join(segment)?;
        }
        Ok(out)
    }

    /// Convert a relative filesystem path. Fails on absolute paths, parent
    /// components, and non-UTF-8 segments.
    pub fn from_fs_path(path: &Path) -> Result<Self, PathError> {
        let mut out = Self::root();
        for component in path.components() {
            match component {
                Component::Normal(os) => {
                    let segment = os
                        .to_str()
                        .ok_or_else(|| PathError::NonUtf8(path.to_path_buf()))?;
                    out = out.join(segment)?;
                }
                Component::CurDir => {}
                _ => return Err(PathError::NotRelative(path.display().to_string())),
            }
        }
        Ok(out)
    }

    /// Append one segment.
    pub fn join(&self, segment: &str) -> Result<Self, PathError> {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
            return Err(PathError::InvalidSegment(segment.to_string()));
        }
        if self.is_root() {
            Ok(Self(segment.to_string()))
        } else {
            Ok(Self(format!("{}/{segment}", self.0)))
        }
    }

    /// Append a whole logical path.
    pub fn concat(&self, other: &Self) -> Self {
        if self.is_root() {
            other.clone()
        } else if other.is_root() {
            self.clone()
        } else {
            Self(format!("{}/{}", self.0, other.0))
        }
    }

    /// The parent path; `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// The final segment; `None` at the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            Some(match self.0.rfind('/') {
                Some(idx) => &self.0[idx + 1..],
                None => &self.0,
            })
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Every ancestor from the first segment down to `self`, excluding the
    /// root. Empty for the root itself.
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::new();
        if self.is_root() {
            return out;
        }
        for (idx, ch) in self.0.char_indices() {
            if ch == '/' {
                out.push(Self(self.0[..idx].to_string()));
            }
        }
        out.push(self.clone());
        out
    }

    /// Whether `self` is `prefix` or lies under it.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        if prefix.is_root() || self.0 == prefix.0 {
            return true;
        }
        self.0.len() > prefix.0.len()
            && self.0.starts_with(&prefix.0)
            && self.0.as_bytes()[prefix.0.len()] == b'/'
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative filesystem path with the same segments.
    pub fn to_fs_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

// Deserialization validates, so a persisted manifest can never smuggle in a
// non-normalized path.
impl<'de> Deserialize<'de> for LogicalPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
