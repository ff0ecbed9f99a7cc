//! In-memory filesystem backend.
//!
//! Stands in for device-exposed storage that has no local path, and backs
//! most tests. All data is ephemeral.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::path::RelativePath;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. The root directory always exists.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<RelativePath, Entry>>,
    read_only: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            RelativePath::root(),
            Entry::Directory {
                attr: FileAttr::directory(),
            },
        );
        Self {
            entries: RwLock::new(entries),
            read_only: false,
        }
    }

    /// Freeze the tree; later writes fail with [`VfsError::ReadOnly`].
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// `.` and `..` have no meaning in a segment-keyed tree.
    fn check_path(path: &RelativePath) -> VfsResult<()> {
        if path.segments().iter().any(|s| s == "." || s == "..") {
            return Err(VfsError::invalid_path(path.as_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Fail unless `path`'s parent exists and is a directory.
    fn check_parent(entries: &HashMap<RelativePath, Entry>, path: &RelativePath) -> VfsResult<()> {
        let parent = path.parent();
        match entries.get(&parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(parent.as_string())),
            None => Err(VfsError::not_found(parent.as_string())),
        }
    }

    fn lock_err<T>(_: T) -> VfsError {
        VfsError::other("lock poisoned")
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn getattr(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        Self::check_path(path)?;
        let entries = self.entries.read().map_err(Self::lock_err)?;
        entries
            .get(path)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(path.as_string()))
    }

    async fn readdir(&self, path: &RelativePath) -> VfsResult<Vec<DirEntry>> {
        Self::check_path(path)?;
        let entries = self.entries.read().map_err(Self::lock_err)?;

        match entries.get(path) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(path.as_string())),
            None => return Err(VfsError::not_found(path.as_string())),
        }

        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(p, _)| p.len() == path.len() + 1 && p.starts_with(path))
            .filter_map(|(p, entry)| {
                let kind = match entry {
                    Entry::File { .. } => FileType::File,
                    Entry::Directory { .. } => FileType::Directory,
                };
                p.last_segment().map(|name| DirEntry::new(name, kind))
            })
            .collect();

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &RelativePath, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        Self::check_path(path)?;
        let entries = self.entries.read().map_err(Self::lock_err)?;

        match entries.get(path) {
            Some(Entry::File { data, .. }) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let end = start.saturating_add(size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(path.as_string())),
            None => Err(VfsError::not_found(path.as_string())),
        }
    }

    async fn write(&self, path: &RelativePath, offset: u64, data: &[u8]) -> VfsResult<u32> {
        Self::check_path(path)?;
        self.check_writable()?;
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        match entries.get_mut(path) {
            Some(Entry::File {
                data: file_data,
                attr,
            }) => {
                let offset = offset as usize;
                if offset + data.len() > file_data.len() {
                    file_data.resize(offset + data.len(), 0);
                }
                file_data[offset..offset + data.len()].copy_from_slice(data);
                attr.size = file_data.len() as u64;
                attr.mtime = Some(SystemTime::now());
                Ok(data.len() as u32)
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(path.as_string())),
            None => Err(VfsError::not_found(path.as_string())),
        }
    }

    async fn create(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        Self::check_path(path)?;
        self.check_writable()?;
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        if entries.contains_key(path) {
            return Err(VfsError::already_exists(path.as_string()));
        }
        Self::check_parent(&entries, path)?;

        let attr = FileAttr::file(0);
        entries.insert(
            path.clone(),
            Entry::File {
                data: Vec::new(),
                attr: attr.clone(),
            },
        );
        Ok(attr)
    }

    async fn mkdir(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        Self::check_path(path)?;
        self.check_writable()?;
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        if entries.contains_key(path) {
            return Err(VfsError::already_exists(path.as_string()));
        }
        Self::check_parent(&entries, path)?;

        let attr = FileAttr::directory();
        entries.insert(path.clone(), Entry::Directory { attr: attr.clone() });
        Ok(attr)
    }

    async fn unlink(&self, path: &RelativePath) -> VfsResult<()> {
        Self::check_path(path)?;
        self.check_writable()?;
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        match entries.get(path) {
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(path.as_string())),
            Some(Entry::File { .. }) => {
                entries.remove(path);
                Ok(())
            }
            None => Err(VfsError::not_found(path.as_string())),
        }
    }

    async fn rmdir(&self, path: &RelativePath) -> VfsResult<()> {
        Self::check_path(path)?;
        self.check_writable()?;
        if path.is_empty() {
            return Err(VfsError::invalid_path("cannot remove root"));
        }
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        match entries.get(path) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(path.as_string())),
            None => return Err(VfsError::not_found(path.as_string())),
        }

        let has_children = entries
            .keys()
            .any(|k| k.len() > path.len() && k.starts_with(path));
        if has_children {
            return Err(VfsError::directory_not_empty(path.as_string()));
        }

        entries.remove(path);
        Ok(())
    }

    async fn truncate(&self, path: &RelativePath, size: u64) -> VfsResult<()> {
        Self::check_path(path)?;
        self.check_writable()?;
        let size = usize::try_from(size).map_err(|_| VfsError::other("size out of range"))?;
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        match entries.get_mut(path) {
            Some(Entry::File { data, attr }) => {
                data.resize(size, 0);
                attr.size = data.len() as u64;
                attr.mtime = Some(SystemTime::now());
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(path.as_string())),
            None => Err(VfsError::not_found(path.as_string())),
        }
    }

    async fn rename(&self, from: &RelativePath, to: &RelativePath) -> VfsResult<()> {
        Self::check_path(from)?;
        Self::check_path(to)?;
        self.check_writable()?;
        if from.is_empty() || to.starts_with(from) {
            return Err(VfsError::invalid_path(format!("cannot move {from} to {to}")));
        }
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        let moving_dir = match entries.get(from) {
            Some(Entry::Directory { .. }) => true,
            Some(Entry::File { .. }) => false,
            None => return Err(VfsError::not_found(from.as_string())),
        };
        Self::check_parent(&entries, to)?;
        match entries.get(to) {
            None => {}
            Some(Entry::File { .. }) if !moving_dir => {}
            Some(_) => return Err(VfsError::already_exists(to.as_string())),
        }

        let moved: Vec<RelativePath> = entries
            .keys()
            .filter(|k| k.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let (Some(tail), Some(entry)) = (old.strip_prefix(from), entries.remove(&old)) {
                entries.insert(to.concat(&tail), entry);
            }
        }
        Ok(())
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn describe(&self, path: &RelativePath) -> String {
        format!("mem:/{path}")
    }
}
