//! Local filesystem backend.
//!
//! Provides access to a real directory (a workstation folder or a mounted
//! Talking Book), with path security to prevent escaping the root.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::path::RelativePath;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/media/TB`, then `read("system/config.txt")` reads
/// `/media/TB/system/config.txt`.
///
/// Path security is enforced: `..` segments and symlinks that land outside
/// the root are rejected with [`VfsError::PathEscapesRoot`].
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time when it exists. A
    /// missing root is allowed; every operation then reports `NotFound`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only local filesystem.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    pub fn resolve(&self, path: &RelativePath) -> VfsResult<PathBuf> {
        if path.is_empty() {
            return Ok(self.root.clone());
        }

        let full = normalize_lexically(&self.root.join(path.to_path_buf()))
            .ok_or_else(|| VfsError::path_escapes_root(path.as_string()))?;

        // Symlinks inside the tree may still point elsewhere.
        let canonical = canonicalize_existing_prefix(&full);
        let canonical_root = canonicalize_existing_prefix(&self.root);
        if !canonical.starts_with(&canonical_root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                canonical_root.display()
            )));
        }

        Ok(full)
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        FileAttr {
            size: if meta.is_dir() { 0 } else { meta.len() },
            kind: if meta.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            },
            mtime: meta.modified().ok(),
        }
    }
}

/// Resolve `.` and `..` without touching the disk.
///
/// Returns `None` if `..` would climb above the filesystem root.
pub(crate) fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    return None;
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    Some(result)
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
pub(crate) fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = dunce::canonicalize(&existing) {
            let mut result = canonical;
            for name in tail.iter().rev() {
                result.push(name);
            }
            return result;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn getattr(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &RelativePath) -> VfsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))?;

        while let Some(entry) = dir.next_entry().await.map_err(VfsError::from)? {
            // Follow symlinks so a linked directory is walked like a real one.
            let kind = match fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_dir() => FileType::Directory,
                Ok(_) => FileType::File,
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "skipping dangling entry");
                    continue;
                }
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &RelativePath, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let full_path = self.resolve(path)?;
        let mut file = fs::File::open(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))?;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(VfsError::from)?;

        // A single read() may return short; keep going until EOF or full.
        let mut buffer = Vec::with_capacity(size as usize);
        (&mut file)
            .take(u64::from(size))
            .read_to_end(&mut buffer)
            .await
            .map_err(VfsError::from)?;

        Ok(buffer)
    }

    async fn write(&self, path: &RelativePath, offset: u64, data: &[u8]) -> VfsResult<u32> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};

        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))?;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(VfsError::from)?;

        file.write_all(data).await.map_err(VfsError::from)?;
        file.flush().await.map_err(VfsError::from)?;

        Ok(data.len() as u32)
    }

    async fn create(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))?;

        let meta = file.metadata().await.map_err(VfsError::from)?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn mkdir(&self, path: &RelativePath) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        if path.is_empty() {
            // The root has no parent inside the backend; bring up the whole chain.
            if fs::try_exists(&full_path).await.map_err(VfsError::from)? {
                return Err(VfsError::already_exists(self.describe(path)));
            }
            fs::create_dir_all(&full_path).await.map_err(VfsError::from)?;
        } else {
            fs::create_dir(&full_path)
                .await
                .map_err(|e| VfsError::from_io(e, path.as_string()))?;
        }

        let meta = fs::metadata(&full_path).await.map_err(VfsError::from)?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn unlink(&self, path: &RelativePath) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        fs::remove_file(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))
    }

    async fn rmdir(&self, path: &RelativePath) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        fs::remove_dir(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))
    }

    async fn truncate(&self, path: &RelativePath, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&full_path)
            .await
            .map_err(|e| VfsError::from_io(e, path.as_string()))?;
        file.set_len(size).await.map_err(VfsError::from)
    }

    async fn rename(&self, from: &RelativePath, to: &RelativePath) -> VfsResult<()> {
        self.check_writable()?;
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| VfsError::from_io(e, from.as_string()))
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn describe(&self, path: &RelativePath) -> String {
        self.root.join(path.to_path_buf()).display().to_string()
    }

    fn base_name(&self) -> Option<String> {
        self.root.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    async fn free_space(&self) -> VfsResult<Option<u64>> {
        #[cfg(unix)]
        {
            use rustix::fs::statvfs;

            let stat = statvfs(&self.root).map_err(|e| VfsError::Io(e.into()))?;
            Ok(Some(stat.f_bavail.saturating_mul(stat.f_frsize)))
        }

        #[cfg(not(unix))]
        {
            Ok(None)
        }
    }
}
