//! File and tree copy with sync-mode skipping and stale-file pruning.
//!
//! All I/O is sequential: one file at a time, depth first. Removable media
//! is slow and easily confused by concurrent access, and nothing here is
//! cancellable.

use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::path::RelativePath;
use crate::vfs::{FileHandle, VfsError, VfsOps, VfsResult};

/// Files at or below this size are always re-copied in sync mode.
pub const SAMPLE_THRESHOLD: u64 = 4096;

/// Chunk size for streaming copies.
pub const COPY_BUFFER_SIZE: u32 = 64 * 1024;

/// Directory/file filter: `(parent directory, child name) -> accept`.
pub type NameFilter = dyn Fn(&FileHandle, &str) -> bool + Send + Sync;

/// Per-file progress: `(bytes copied so far, total bytes)`.
pub type Progress<'a> = &'a mut (dyn FnMut(u64, u64) + Send);

/// What [`copy_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Bytes were streamed to the destination.
    Copied(u64),
    /// Sync mode judged the destination identical and left it alone.
    Skipped,
}

/// Options for [`copy_dir`].
#[derive(Clone, Copy, Default)]
pub struct CopyOptions<'a> {
    /// Files to copy; `None` accepts all.
    pub file_filter: Option<&'a NameFilter>,
    /// Directories to descend into; `None` accepts all.
    pub dir_filter: Option<&'a NameFilter>,
    /// Skip files that look unchanged, and prune stale destination paths.
    pub sync: bool,
    /// In sync mode, leave destination paths that have no source
    /// counterpart.
    pub preserve_extra_dest_files: bool,
}

impl<'a> CopyOptions<'a> {
    /// Mirror mode: skip unchanged files and prune everything else.
    pub fn mirror() -> Self {
        Self {
            sync: true,
            ..Self::default()
        }
    }

    pub fn with_file_filter(mut self, filter: &'a NameFilter) -> Self {
        self.file_filter = Some(filter);
        self
    }

    pub fn with_dir_filter(mut self, filter: &'a NameFilter) -> Self {
        self.dir_filter = Some(filter);
        self
    }

    pub fn preserving_extra_files(mut self) -> Self {
        self.preserve_extra_dest_files = true;
        self
    }

    fn accepts_file(&self, parent: &FileHandle, name: &str) -> bool {
        self.file_filter.is_none_or(|f| f(parent, name))
    }

    fn accepts_dir(&self, parent: &FileHandle, name: &str) -> bool {
        self.dir_filter.is_none_or(|f| f(parent, name))
    }

    fn prunes(&self) -> bool {
        self.sync && !self.preserve_extra_dest_files
    }
}

/// Counters from one [`copy_dir`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files_copied: u64,
    pub files_skipped: u64,
    pub bytes_copied: u64,
    pub dirs_created: u64,
    pub paths_pruned: u64,
}

/// Cheap equality check used by sync mode.
///
/// Only files larger than [`SAMPLE_THRESHOLD`] qualify; they match when the
/// lengths, the first byte and the last byte agree. Files differing only in
/// the middle are treated as identical.
async fn same_by_sampling(src: &FileHandle, dst: &FileHandle, src_len: u64) -> VfsResult<bool> {
    if src_len <= SAMPLE_THRESHOLD {
        return Ok(false);
    }
    let dst_attr = dst.fs().getattr(dst.path()).await?;
    if dst_attr.is_dir() || dst_attr.size != src_len {
        return Ok(false);
    }
    for offset in [0, src_len - 1] {
        let a = src.fs().read(src.path(), offset, 1).await?;
        let b = dst.fs().read(dst.path(), offset, 1).await?;
        if a != b {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Copy one file.
///
/// In `sync` mode an existing destination that passes the sampling check is
/// left untouched. Otherwise any existing destination is deleted and the
/// source is streamed across in [`COPY_BUFFER_SIZE`] chunks.
pub async fn copy_file(
    src: &FileHandle,
    dst: &FileHandle,
    sync: bool,
    mut progress: Option<Progress<'_>>,
) -> VfsResult<CopyOutcome> {
    let src_attr = src.fs().getattr(src.path()).await?;
    if src_attr.is_dir() {
        return Err(VfsError::is_a_directory(src.describe()));
    }
    let total = src_attr.size;

    if let Ok(dst_attr) = dst.fs().getattr(dst.path()).await {
        if sync && same_by_sampling(src, dst, total).await? {
            tracing::trace!(dst = %dst, "unchanged, skipping");
            return Ok(CopyOutcome::Skipped);
        }
        if dst_attr.is_dir() {
            delete_recursive(dst).await?;
        } else {
            dst.delete_file().await?;
        }
    }

    dst.fs().create(dst.path()).await?;
    let mut offset = 0u64;
    loop {
        let chunk = src.fs().read(src.path(), offset, COPY_BUFFER_SIZE).await?;
        if chunk.is_empty() {
            break;
        }
        dst.fs().write(dst.path(), offset, &chunk).await?;
        offset += chunk.len() as u64;
        if let Some(report) = progress.as_deref_mut() {
            report(offset, total);
        }
    }

    tracing::debug!(src = %src, dst = %dst, bytes = offset, "copied file");
    Ok(CopyOutcome::Copied(offset))
}

/// Copy the tree under `src` into `dst`.
///
/// Destination directories are created as needed. Only directories accepted
/// by `dir_filter` are descended into and only files accepted by
/// `file_filter` are copied. In sync mode without
/// `preserve_extra_dest_files`, the matching destination paths are
/// snapshotted first, the copy removes every path it touches from the
/// snapshot, and whatever remains is pruned last.
pub async fn copy_dir(
    src: &FileHandle,
    dst: &FileHandle,
    options: &CopyOptions<'_>,
) -> VfsResult<CopyStats> {
    if !src.is_dir().await {
        return Err(if src.exists().await {
            VfsError::not_a_directory(src.describe())
        } else {
            VfsError::not_found(src.describe())
        });
    }
    dst.mkdirs().await?;

    let src_root = FileHandle::root(Arc::new(src.view()) as Arc<dyn VfsOps>);
    let dst_root = FileHandle::root(Arc::new(dst.view()) as Arc<dyn VfsOps>);

    let mut snapshot = if options.prunes() {
        let mut found = BTreeSet::new();
        gather(&dst_root, RelativePath::root(), options, &mut found).await?;
        Some(found)
    } else {
        None
    };

    let mut stats = CopyStats::default();
    copy_tree(
        &src_root,
        &dst_root,
        RelativePath::root(),
        options,
        &mut snapshot,
        &mut stats,
    )
    .await?;

    if let Some(stale) = snapshot {
        prune(&dst_root, stale, &mut stats).await?;
    }

    tracing::info!(
        src = %src,
        dst = %dst,
        copied = stats.files_copied,
        skipped = stats.files_skipped,
        bytes = stats.bytes_copied,
        pruned = stats.paths_pruned,
        "copied tree"
    );
    Ok(stats)
}

/// Collect every destination path the filters would let a copy touch.
fn gather<'a>(
    root: &'a FileHandle,
    rel: RelativePath,
    options: &'a CopyOptions<'a>,
    found: &'a mut BTreeSet<RelativePath>,
) -> BoxFuture<'a, VfsResult<()>> {
    Box::pin(async move {
        let dir = root.open_path(&rel);
        for entry in dir.entries().await? {
            let child = rel.join(&entry.name);
            if entry.kind.is_dir() {
                if options.accepts_dir(&dir, &entry.name) {
                    found.insert(child.clone());
                    gather(root, child, options, found).await?;
                }
            } else if options.accepts_file(&dir, &entry.name) {
                found.insert(child);
            }
        }
        Ok(())
    })
}

fn copy_tree<'a>(
    src_root: &'a FileHandle,
    dst_root: &'a FileHandle,
    rel: RelativePath,
    options: &'a CopyOptions<'a>,
    snapshot: &'a mut Option<BTreeSet<RelativePath>>,
    stats: &'a mut CopyStats,
) -> BoxFuture<'a, VfsResult<()>> {
    Box::pin(async move {
        let src_dir = src_root.open_path(&rel);
        for entry in src_dir.entries().await? {
            let child = rel.join(&entry.name);
            let target = dst_root.open_path(&child);

            if entry.kind.is_dir() {
                if !options.accepts_dir(&src_dir, &entry.name) {
                    continue;
                }
                if let Some(stale) = snapshot.as_mut() {
                    stale.remove(&child);
                }
                if !target.is_dir().await {
                    if target.exists().await {
                        target.delete_file().await?;
                    }
                    target.mkdirs().await?;
                    stats.dirs_created += 1;
                }
                copy_tree(src_root, dst_root, child, options, snapshot, stats).await?;
            } else {
                if !options.accepts_file(&src_dir, &entry.name) {
                    continue;
                }
                if let Some(stale) = snapshot.as_mut() {
                    stale.remove(&child);
                }
                let source = src_root.open_path(&child);
                match copy_file(&source, &target, options.sync, None).await? {
                    CopyOutcome::Copied(bytes) => {
                        stats.files_copied += 1;
                        stats.bytes_copied += bytes;
                    }
                    CopyOutcome::Skipped => stats.files_skipped += 1,
                }
            }
        }
        Ok(())
    })
}

/// Delete every stale path, children before parents.
///
/// The first failure is remembered and returned once every other deletion
/// has been attempted.
async fn prune(
    root: &FileHandle,
    stale: BTreeSet<RelativePath>,
    stats: &mut CopyStats,
) -> VfsResult<()> {
    let mut first_error: Option<VfsError> = None;

    for rel in stale.into_iter().rev() {
        let target = root.open_path(&rel);
        let result = match target.fs().getattr(target.path()).await {
            Ok(attr) if attr.is_dir() => delete_recursive(&target).await,
            Ok(_) => target.delete_file().await,
            Err(e) if e.is_not_found() => continue,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                tracing::debug!(path = %target, "pruned stale path");
                stats.paths_pruned += 1;
            }
            Err(e) => {
                tracing::warn!(path = %target, error = %e, "failed to prune stale path");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Delete `target` and everything under it, children first.
pub fn delete_recursive(target: &FileHandle) -> BoxFuture<'_, VfsResult<()>> {
    Box::pin(async move {
        let attr = target.fs().getattr(target.path()).await?;
        if attr.is_dir() {
            for entry in target.entries().await? {
                delete_recursive(&target.open(&entry.name)).await?;
            }
            target.rmdir().await
        } else {
            target.delete_file().await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{DirEntry, FileAttr, MemoryBackend};
    use async_trait::async_trait;

    fn mem_root() -> FileHandle {
        FileHandle::root(Arc::new(MemoryBackend::new()))
    }

    async fn put(root: &FileHandle, path: &str, content: &[u8]) {
        let f = root.open(path);
        f.parent().mkdirs().await.unwrap();
        f.create_new(content, true).await.unwrap();
    }

    fn big(fill: u8) -> Vec<u8> {
        let mut data = vec![fill; 10_000];
        data[0] = b'<';
        data[9_999] = b'>';
        data
    }

    #[tokio::test]
    async fn test_copy_file_streams_with_progress() {
        let root = mem_root();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        put(&root, "src.bin", &data).await;

        let mut reports = Vec::new();
        let mut progress = |done: u64, total: u64| reports.push((done, total));
        let outcome = copy_file(&root.open("src.bin"), &root.open("dst.bin"), false, Some(&mut progress))
            .await
            .unwrap();

        assert_eq!(outcome, CopyOutcome::Copied(200_000));
        assert_eq!(root.open("dst.bin").read_to_end().await.unwrap(), data);
        assert_eq!(reports.len(), 4);
        assert_eq!(reports.last(), Some(&(200_000, 200_000)));
    }

    #[tokio::test]
    async fn test_sync_skips_sampled_match() {
        let root = mem_root();
        put(&root, "src", &big(b'a')).await;
        put(&root, "dst", &big(b'a')).await;

        let outcome = copy_file(&root.open("src"), &root.open("dst"), true, None).await.unwrap();
        assert_eq!(outcome, CopyOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_sync_sampling_ignores_middle_bytes() {
        let root = mem_root();
        put(&root, "src", &big(b'a')).await;
        put(&root, "dst", &big(b'b')).await;

        let outcome = copy_file(&root.open("src"), &root.open("dst"), true, None).await.unwrap();
        assert_eq!(outcome, CopyOutcome::Skipped);
        assert_eq!(root.open("dst").read_to_end().await.unwrap(), big(b'b'));
    }

    #[tokio::test]
    async fn test_sync_recopies_small_and_changed_files() {
        let root = mem_root();
        put(&root, "small_src", b"same").await;
        put(&root, "small_dst", b"same").await;
        let outcome = copy_file(&root.open("small_src"), &root.open("small_dst"), true, None)
            .await
            .unwrap();
        assert_eq!(outcome, CopyOutcome::Copied(4));

        let mut changed = big(b'a');
        changed[9_999] = b'!';
        put(&root, "big_src", &changed).await;
        put(&root, "big_dst", &big(b'a')).await;
        let outcome = copy_file(&root.open("big_src"), &root.open("big_dst"), true, None)
            .await
            .unwrap();
        assert_eq!(outcome, CopyOutcome::Copied(10_000));
        assert_eq!(root.open("big_dst").read_to_end().await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_non_sync_always_copies() {
        let root = mem_root();
        put(&root, "src", &big(b'a')).await;
        put(&root, "dst", &big(b'a')).await;

        let outcome = copy_file(&root.open("src"), &root.open("dst"), false, None).await.unwrap();
        assert_eq!(outcome, CopyOutcome::Copied(10_000));
    }

    #[tokio::test]
    async fn test_copy_dir_mirrors_and_prunes() {
        let src = mem_root();
        put(&src, "system/config.txt", b"cfg").await;
        put(&src, "messages/a.a18", &big(b'm')).await;
        let dst = mem_root();
        put(&dst, "stale.txt", b"old").await;
        put(&dst, "old_dir/deep/x", b"old").await;
        put(&dst, "system/config.txt", b"outdated").await;

        let stats = copy_dir(&src, &dst, &CopyOptions::mirror()).await.unwrap();

        assert_eq!(stats.files_copied, 2);
        assert_eq!(dst.list().await.unwrap(), ["messages", "system"]);
        assert_eq!(dst.open("system/config.txt").read_to_end().await.unwrap(), b"cfg");
        assert!(stats.paths_pruned >= 2);
    }

    #[tokio::test]
    async fn test_copy_dir_rerun_copies_nothing_large() {
        let src = mem_root();
        put(&src, "a/big1", &big(b'1')).await;
        put(&src, "a/b/big2", &big(b'2')).await;
        let dst = mem_root();

        let first = copy_dir(&src, &dst, &CopyOptions::mirror()).await.unwrap();
        assert_eq!(first.files_copied, 2);

        let second = copy_dir(&src, &dst, &CopyOptions::mirror()).await.unwrap();
        assert_eq!(second.files_copied, 0);
        assert_eq!(second.files_skipped, 2);
        assert_eq!(second.paths_pruned, 0);
    }

    #[tokio::test]
    async fn test_copy_dir_preserves_extra_files() {
        let src = mem_root();
        put(&src, "a.txt", b"a").await;
        let dst = mem_root();
        put(&dst, "keep.txt", b"k").await;

        let options = CopyOptions::mirror().preserving_extra_files();
        copy_dir(&src, &dst, &options).await.unwrap();
        assert_eq!(dst.list().await.unwrap(), ["a.txt", "keep.txt"]);
    }

    #[tokio::test]
    async fn test_copy_dir_filters() {
        let src = mem_root();
        put(&src, "keep/a.txt", b"a").await;
        put(&src, "keep/b.tmp", b"b").await;
        put(&src, "skip/c.txt", b"c").await;
        let dst = mem_root();
        put(&dst, "skip/untouched.txt", b"u").await;
        put(&dst, "keep/old.tmp", b"o").await;

        let files = |_: &FileHandle, name: &str| !name.ends_with(".tmp");
        let dirs = |_: &FileHandle, name: &str| name != "skip";
        let options = CopyOptions::mirror()
            .with_file_filter(&files)
            .with_dir_filter(&dirs);
        copy_dir(&src, &dst, &options).await.unwrap();

        assert_eq!(dst.open("keep").list().await.unwrap(), ["a.txt", "old.tmp"]);
        // Filtered-out destination subtrees are outside the snapshot.
        assert!(dst.open("skip/untouched.txt").exists().await);
    }

    #[tokio::test]
    async fn test_copy_dir_missing_source() {
        let src = mem_root();
        let dst = mem_root();
        let err = copy_dir(&src.open("nope"), &dst, &CopyOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    /// Memory backend whose `unlink` fails for one file name.
    struct StubbornBackend {
        inner: MemoryBackend,
        stuck: &'static str,
    }

    #[async_trait]
    impl VfsOps for StubbornBackend {
        async fn getattr(&self, path: &RelativePath) -> VfsResult<FileAttr> {
            self.inner.getattr(path).await
        }
        async fn readdir(&self, path: &RelativePath) -> VfsResult<Vec<DirEntry>> {
            self.inner.readdir(path).await
        }
        async fn read(&self, path: &RelativePath, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
            self.inner.read(path, offset, size).await
        }
        async fn write(&self, path: &RelativePath, offset: u64, data: &[u8]) -> VfsResult<u32> {
            self.inner.write(path, offset, data).await
        }
        async fn create(&self, path: &RelativePath) -> VfsResult<FileAttr> {
            self.inner.create(path).await
        }
        async fn mkdir(&self, path: &RelativePath) -> VfsResult<FileAttr> {
            self.inner.mkdir(path).await
        }
        async fn unlink(&self, path: &RelativePath) -> VfsResult<()> {
            if path.last_segment() == Some(self.stuck) {
                return Err(VfsError::other("device busy"));
            }
            self.inner.unlink(path).await
        }
        async fn rmdir(&self, path: &RelativePath) -> VfsResult<()> {
            self.inner.rmdir(path).await
        }
        async fn truncate(&self, path: &RelativePath, size: u64) -> VfsResult<()> {
            self.inner.truncate(path, size).await
        }
        async fn rename(&self, from: &RelativePath, to: &RelativePath) -> VfsResult<()> {
            self.inner.rename(from, to).await
        }
        fn read_only(&self) -> bool {
            false
        }
        fn describe(&self, path: &RelativePath) -> String {
            self.inner.describe(path)
        }
    }

    #[tokio::test]
    async fn test_prune_attempts_everything_then_reports_first_error() {
        let src = mem_root();
        put(&src, "fresh.txt", b"f").await;
        let dst = FileHandle::root(Arc::new(StubbornBackend {
            inner: MemoryBackend::new(),
            stuck: "b.txt",
        }));
        for name in ["a.txt", "b.txt", "c.txt"] {
            put(&dst, name, b"stale").await;
        }

        let err = copy_dir(&src, &dst, &CopyOptions::mirror()).await.unwrap_err();
        assert!(matches!(err, VfsError::Other(ref m) if m == "device busy"));
        assert_eq!(dst.list().await.unwrap(), ["b.txt", "fresh.txt"]);
    }

    #[tokio::test]
    async fn test_delete_recursive_post_order() {
        let root = mem_root();
        put(&root, "d/e/f.txt", b"x").await;
        put(&root, "d/g.txt", b"y").await;

        delete_recursive(&root.open("d")).await.unwrap();
        assert!(root.list().await.unwrap().is_empty());
    }
}
