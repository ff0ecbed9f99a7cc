//! VFS operations trait.
//!
//! Path-based primitives with explicit offset/size, so a backend never has
//! to hold open-file state between calls.

use async_trait::async_trait;

use super::VfsResult;
use super::types::{DirEntry, FileAttr};
use crate::path::RelativePath;

/// Storage primitives implemented by every backend.
///
/// Paths are always relative to the backend's root. Checked, higher level
/// operations (`mkdirs`, recursive delete, overwrite-aware create) live on
/// [`FileHandle`](super::FileHandle) and are written once against these.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn getattr(&self, path: &RelativePath) -> VfsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    async fn readdir(&self, path: &RelativePath) -> VfsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &RelativePath, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write(&self, path: &RelativePath, offset: u64, data: &[u8]) -> VfsResult<u32>;

    /// Create a new empty file.
    ///
    /// Fails with `AlreadyExists` if anything is at `path`, and with
    /// `NotFound` if the parent directory is missing.
    async fn create(&self, path: &RelativePath) -> VfsResult<FileAttr>;

    /// Create a single directory level.
    ///
    /// Fails with `AlreadyExists` if anything is at `path`, and with
    /// `NotFound` if the parent directory is missing.
    async fn mkdir(&self, path: &RelativePath) -> VfsResult<FileAttr>;

    /// Remove a file.
    async fn unlink(&self, path: &RelativePath) -> VfsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &RelativePath) -> VfsResult<()>;

    /// Set a file's length, zero-filling when it grows.
    async fn truncate(&self, path: &RelativePath, size: u64) -> VfsResult<()>;

    /// Move a file or directory. An existing file at `to` is replaced.
    async fn rename(&self, from: &RelativePath, to: &RelativePath) -> VfsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this filesystem is read-only.
    fn read_only(&self) -> bool;

    /// Human-readable location of `path`, e.g. an absolute disk path.
    fn describe(&self, path: &RelativePath) -> String;

    /// Name of the backend's root directory, if it has one.
    fn base_name(&self) -> Option<String> {
        None
    }

    /// Bytes available to the caller, if the backend can tell.
    async fn free_space(&self) -> VfsResult<Option<u64>> {
        Ok(None)
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &RelativePath) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Check if a path exists and is a directory.
    async fn is_dir(&self, path: &RelativePath) -> bool {
        self.getattr(path).await.map(|a| a.is_dir()).unwrap_or(false)
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &RelativePath) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        if attr.is_dir() {
            return Err(super::VfsError::is_a_directory(path.as_string()));
        }
        let size = u32::try_from(attr.size)
            .map_err(|_| super::VfsError::other(format!("{path} is too large to read whole")))?;
        self.read(path, 0, size).await
    }

    /// Replace a file's contents, creating it if missing.
    async fn write_all(&self, path: &RelativePath, data: &[u8]) -> VfsResult<()> {
        match self.create(path).await {
            Ok(_) => {}
            Err(super::VfsError::AlreadyExists(_)) => self.truncate(path, 0).await?,
            Err(e) => return Err(e),
        }
        let mut offset = 0usize;
        while offset < data.len() {
            let end = data.len().min(offset.saturating_add(u32::MAX as usize));
            let written = self.write(path, offset as u64, &data[offset..end]).await?;
            if written == 0 {
                return Err(super::VfsError::other(format!("short write to {path}")));
            }
            offset += written as usize;
        }
        Ok(())
    }
}
