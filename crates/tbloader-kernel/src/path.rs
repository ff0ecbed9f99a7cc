//! Relative paths as immutable segment sequences.
//!
//! A [`RelativePath`] never touches storage. Backends interpret it relative
//! to their own root, and a [`View`](crate::vfs::View) re-roots one by
//! prefixing another.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Separator used by [`RelativePath::as_string`].
pub const SEPARATOR: char = '/';

/// An ordered sequence of non-empty, separator-free path segments.
///
/// Equality and hashing are structural over the segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath {
    segments: Vec<String>,
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

impl RelativePath {
    /// The empty path, naming the root of whatever it is resolved against.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from a list of segments.
    ///
    /// Segments containing separators are split; empty segments are dropped.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments = segments
            .into_iter()
            .flat_map(|s| {
                s.as_ref()
                    .split(is_separator)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { segments }
    }

    /// Tokenize a path string on `/` (or `\`).
    pub fn parse(path: &str) -> Self {
        Self::new([path])
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Drop the last segment. The parent of the empty path is empty.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Append a single child name (which may itself contain separators).
    pub fn join(&self, child: &str) -> Self {
        self.concat(&Self::parse(child))
    }

    /// Order-preserving union of two segment sequences.
    pub fn concat(&self, other: &RelativePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Concatenate any number of paths in order.
    pub fn concat_all<'a>(paths: impl IntoIterator<Item = &'a RelativePath>) -> Self {
        let segments = paths
            .into_iter()
            .flat_map(|p| p.segments.iter().cloned())
            .collect();
        Self { segments }
    }

    pub fn starts_with(&self, prefix: &RelativePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Remove `prefix` from the front, if present.
    pub fn strip_prefix(&self, prefix: &RelativePath) -> Option<Self> {
        self.starts_with(prefix).then(|| Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }

    /// Segments joined by [`SEPARATOR`]. The empty path renders as `""`.
    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }

    /// Platform path form, for joining onto a local directory.
    pub fn to_path_buf(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl FromStr for RelativePath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for RelativePath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}
