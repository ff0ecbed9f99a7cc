//! Re-rooted view over another filesystem.
//!
//! A [`View`] lets code treat a subtree as an independent filesystem: the
//! sync engine copies "content/" of a staging area onto the root of a
//! device without either side knowing about the other's layout.

use async_trait::async_trait;
use std::sync::Arc;

use super::error::VfsResult;
use super::ops::VfsOps;
use super::types::{DirEntry, FileAttr};
use crate::path::RelativePath;

/// A filesystem re-rooted at a fixed prefix of another.
///
/// Every operation on `path` is forwarded as `prefix.concat(path)`.
#[derive(Clone)]
pub struct View {
    inner: Arc<dyn VfsOps>,
    prefix: RelativePath,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("root", &self.inner.describe(&self.prefix))
            .finish()
    }
}

impl View {
    pub fn new(inner: Arc<dyn VfsOps>, prefix: RelativePath) -> Self {
        Self { inner, prefix }
    }

    /// The wrapped filesystem.
    pub fn inner(&self) -> &Arc<dyn VfsOps> {
        &self.inner
    }

    pub fn prefix(&self) -> &RelativePath {
        &self.prefix
    }

    /// Translate a view-relative path to the wrapped filesystem.
    pub fn translate(&self, path: &RelativePath) -> RelativePath {
        self.prefix.concat(path)
    }
}

#[async_trait]
impl VfsOps for View {
    async fn getattr(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        self.inner.getattr(&self.translate(path)).await
    }

    async fn readdir(&self, path: &RelativePath) -> VfsResult<Vec<DirEntry>> {
        self.inner.readdir(&self.translate(path)).await
    }

    async fn read(&self, path: &RelativePath, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        self.inner.read(&self.translate(path), offset, size).await
    }

    async fn write(&self, path: &RelativePath, offset: u64, data: &[u8]) -> VfsResult<u32> {
        self.inner.write(&self.translate(path), offset, data).await
    }

    async fn create(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        self.inner.create(&self.translate(path)).await
    }

    async fn mkdir(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        self.inner.mkdir(&self.translate(path)).await
    }

    async fn unlink(&self, path: &RelativePath) -> VfsResult<()> {
        self.inner.unlink(&self.translate(path)).await
    }

    async fn rmdir(&self, path: &RelativePath) -> VfsResult<()> {
        self.inner.rmdir(&self.translate(path)).await
    }

    async fn truncate(&self, path: &RelativePath, size: u64) -> VfsResult<()> {
        self.inner.truncate(&self.translate(path), size).await
    }

    async fn rename(&self, from: &RelativePath, to: &RelativePath) -> VfsResult<()> {
        self.inner
            .rename(&self.translate(from), &self.translate(to))
            .await
    }

    fn read_only(&self) -> bool {
        self.inner.read_only()
    }

    fn describe(&self, path: &RelativePath) -> String {
        self.inner.describe(&self.translate(path))
    }

    fn base_name(&self) -> Option<String> {
        self.prefix
            .last_segment()
            .map(str::to_owned)
            .or_else(|| self.inner.base_name())
    }

    async fn free_space(&self) -> VfsResult<Option<u64>> {
        self.inner.free_space().await
    }
}
