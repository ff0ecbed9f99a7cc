//! File handles: one node in a tree, named by (filesystem, relative path).

use std::path::PathBuf;
use std::sync::Arc;

use super::backends::LocalBackend;
use super::error::{VfsError, VfsResult};
use super::ops::VfsOps;
use super::types::DirEntry;
use super::view::View;
use crate::path::RelativePath;

/// Identifies one file or directory. Holds no content and does not require
/// the node to exist.
///
/// Handles are cheap to clone and to derive (`open`, `parent`); all
/// operations go straight to the backing [`VfsOps`].
#[derive(Clone)]
pub struct FileHandle {
    fs: Arc<dyn VfsOps>,
    path: RelativePath,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FileHandle").field(&self.describe()).finish()
    }
}

impl std::fmt::Display for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl FileHandle {
    /// A node addressed by (root filesystem, relative path).
    pub fn new(fs: Arc<dyn VfsOps>, path: RelativePath) -> Self {
        Self { fs, path }
    }

    /// The root of `fs`.
    pub fn root(fs: Arc<dyn VfsOps>) -> Self {
        Self::new(fs, RelativePath::root())
    }

    /// A node addressed by absolute local identity.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::root(Arc::new(LocalBackend::new(path)))
    }

    pub fn fs(&self) -> &Arc<dyn VfsOps> {
        &self.fs
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    /// Last path segment; `None` for a filesystem root.
    pub fn name(&self) -> Option<&str> {
        self.path.last_segment()
    }

    /// Like [`name`](Self::name), but a backend root reports the name of
    /// the directory it is rooted at.
    pub fn base_name(&self) -> Option<String> {
        match self.name() {
            Some(name) => Some(name.to_owned()),
            None => self.fs.base_name(),
        }
    }

    /// A child handle. The child need not exist.
    pub fn open(&self, child: &str) -> FileHandle {
        Self::new(self.fs.clone(), self.path.join(child))
    }

    pub fn open_path(&self, rel: &RelativePath) -> FileHandle {
        Self::new(self.fs.clone(), self.path.concat(rel))
    }

    pub fn parent(&self) -> FileHandle {
        Self::new(self.fs.clone(), self.path.parent())
    }

    /// This node as the root of an independent filesystem.
    pub fn view(&self) -> View {
        View::new(self.fs.clone(), self.path.clone())
    }

    pub fn describe(&self) -> String {
        self.fs.describe(&self.path)
    }

    pub async fn exists(&self) -> bool {
        self.fs.exists(&self.path).await
    }

    pub async fn is_dir(&self) -> bool {
        self.fs.is_dir(&self.path).await
    }

    /// File size in bytes.
    pub async fn len(&self) -> VfsResult<u64> {
        Ok(self.fs.getattr(&self.path).await?.size)
    }

    pub async fn entries(&self) -> VfsResult<Vec<DirEntry>> {
        self.fs.readdir(&self.path).await
    }

    /// Child names, sorted.
    pub async fn list(&self) -> VfsResult<Vec<String>> {
        self.list_filtered(|_| true).await
    }

    /// Child names accepted by `filter`, sorted.
    pub async fn list_filtered(&self, filter: impl Fn(&str) -> bool) -> VfsResult<Vec<String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|e| e.name)
            .filter(|name| filter(name))
            .collect())
    }

    /// Create this file with `content`.
    ///
    /// Fails with `AlreadyExists` if the file exists, unless `overwrite` is
    /// set, in which case the old file is deleted first.
    pub async fn create_new(&self, content: &[u8], overwrite: bool) -> VfsResult<()> {
        if let Ok(attr) = self.fs.getattr(&self.path).await {
            if !overwrite {
                return Err(VfsError::already_exists(self.describe()));
            }
            if attr.is_dir() {
                return Err(VfsError::is_a_directory(self.describe()));
            }
            self.fs.unlink(&self.path).await?;
        }
        self.fs.write_all(&self.path, content).await
    }

    /// Create this directory. Fails if anything already exists here.
    pub async fn mkdir(&self) -> VfsResult<()> {
        self.fs.mkdir(&self.path).await.map(|_| ())
    }

    /// Create this directory and any missing ancestors. Idempotent.
    pub async fn mkdirs(&self) -> VfsResult<()> {
        let segments = self.path.segments();
        for depth in 0..=segments.len() {
            let prefix = RelativePath::new(&segments[..depth]);
            match self.fs.getattr(&prefix).await {
                Ok(attr) if attr.is_dir() => continue,
                Ok(_) => return Err(VfsError::not_a_directory(self.fs.describe(&prefix))),
                Err(e) if e.is_not_found() => match self.fs.mkdir(&prefix).await {
                    Ok(_) | Err(VfsError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn delete_file(&self) -> VfsResult<()> {
        self.fs.unlink(&self.path).await
    }

    /// Remove this directory. Fails if it is not empty.
    pub async fn rmdir(&self) -> VfsResult<()> {
        self.fs.rmdir(&self.path).await
    }

    /// Remove this directory and everything under it. Absence is not an
    /// error.
    pub async fn delete_directory(&self) -> VfsResult<()> {
        if !self.exists().await {
            return Ok(());
        }
        crate::sync::delete_recursive(self).await
    }

    pub async fn read_to_end(&self) -> VfsResult<Vec<u8>> {
        self.fs.read_all(&self.path).await
    }

    /// Whole file as text; invalid UTF-8 is replaced rather than rejected.
    pub async fn read_to_string(&self) -> VfsResult<String> {
        let bytes = self.read_to_end().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::MemoryBackend;
    use tempfile::TempDir;

    fn mem_root() -> FileHandle {
        FileHandle::root(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_open_does_not_require_existence() {
        let root = mem_root();
        let child = root.open("system").open("config.txt");
        assert_eq!(child.path().as_string(), "system/config.txt");
        assert!(!child.exists().await);
        assert_eq!(child.name(), Some("config.txt"));
        assert_eq!(child.parent().path().as_string(), "system");
    }

    #[tokio::test]
    async fn test_create_new_overwrite_semantics() {
        let f = mem_root().open("a.txt");
        f.create_new(b"one", false).await.unwrap();

        let err = f.create_new(b"two", false).await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
        assert_eq!(f.read_to_end().await.unwrap(), b"one");

        f.create_new(b"three", true).await.unwrap();
        assert_eq!(f.read_to_string().await.unwrap(), "three");
    }

    #[tokio::test]
    async fn test_mkdir_and_mkdirs() {
        let root = mem_root();
        let deep = root.open("a/b/c");

        assert!(deep.mkdir().await.unwrap_err().is_not_found());
        deep.mkdirs().await.unwrap();
        deep.mkdirs().await.unwrap();
        assert!(root.open("a/b").is_dir().await);

        let err = root.open("a").mkdir().await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_mkdirs_through_file_fails() {
        let root = mem_root();
        root.open("f").create_new(b"", false).await.unwrap();
        let err = root.open("f/g").mkdirs().await.unwrap_err();
        assert!(matches!(err, VfsError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_list_filtered() {
        let root = mem_root();
        for name in ["b.srn", "a.srn", "c.txt"] {
            root.open(name).create_new(b"", false).await.unwrap();
        }
        assert_eq!(root.list().await.unwrap(), ["a.srn", "b.srn", "c.txt"]);
        let srns = root.list_filtered(|n| n.ends_with(".srn")).await.unwrap();
        assert_eq!(srns, ["a.srn", "b.srn"]);
    }

    #[tokio::test]
    async fn test_rmdir_and_delete_directory() {
        let root = mem_root();
        let dir = root.open("d");
        dir.open("e").mkdirs().await.unwrap();
        dir.open("e/f.txt").create_new(b"x", false).await.unwrap();

        assert!(matches!(dir.rmdir().await, Err(VfsError::DirectoryNotEmpty(_))));
        dir.delete_directory().await.unwrap();
        assert!(!dir.exists().await);

        // Absence is tolerated.
        dir.delete_directory().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_handle() {
        let tmp = TempDir::new().unwrap();
        let root = FileHandle::local(tmp.path());
        root.open("system").mkdirs().await.unwrap();
        root.open("system/x.txt").create_new(b"hi", false).await.unwrap();

        assert_eq!(std::fs::read(tmp.path().join("system/x.txt")).unwrap(), b"hi");
        assert_eq!(root.open("system/x.txt").len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_local_mkdirs_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let root = FileHandle::local(tmp.path().join("a/b/c"));

        root.mkdirs().await.unwrap();
        assert!(tmp.path().join("a/b/c").is_dir());
        root.mkdirs().await.unwrap();

        let err = root.mkdir().await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_base_name() {
        let tmp = TempDir::new().unwrap();
        let root = FileHandle::local(tmp.path().join("DEMO-2024-1"));
        assert_eq!(root.name(), None);
        assert_eq!(root.base_name().as_deref(), Some("DEMO-2024-1"));
        assert_eq!(root.open("system").base_name().as_deref(), Some("system"));

        let view_root = FileHandle::root(Arc::new(root.open("system").view()));
        assert_eq!(view_root.base_name().as_deref(), Some("system"));
        assert_eq!(mem_root().base_name(), None);
    }
}
