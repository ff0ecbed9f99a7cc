//! Core VFS types.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes; zero for directories.
    pub size: u64,
    pub kind: FileType,
    /// Last modification time, when the backend tracks one.
    pub mtime: Option<SystemTime>,
}

impl FileAttr {
    pub fn file(size: u64) -> Self {
        Self {
            size,
            kind: FileType::File,
            mtime: Some(SystemTime::now()),
        }
    }

    pub fn directory() -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            mtime: Some(SystemTime::now()),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}
