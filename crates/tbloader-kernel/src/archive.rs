//! Zip packaging of deployment trees, and guarded extraction.
//!
//! Packing walks any [`FileHandle`] tree. Unpacking always targets a local
//! directory, since containment is checked against its canonical path.

use futures::future::BoxFuture;
use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::path::RelativePath;
use crate::sync::COPY_BUFFER_SIZE;
use crate::vfs::backends::{canonicalize_existing_prefix, normalize_lexically};
use crate::vfs::{FileHandle, VfsError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    /// An entry would land outside the extraction directory.
    #[error("unexpected path contained in zip file: {0}")]
    UnsafeEntry(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Options for [`zip_dir`].
#[derive(Debug, Clone, Default)]
pub struct ZipOptions {
    /// Put the source directory's own name at the top of every entry.
    pub include_base_dir: bool,
    /// Only these top-level subdirectories are packed. Files directly in
    /// the source directory are always packed.
    pub subdirs: Option<Vec<String>>,
}

impl ZipOptions {
    pub fn with_base_dir(mut self) -> Self {
        self.include_base_dir = true;
        self
    }

    pub fn with_subdirs<I, S>(mut self, subdirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subdirs = Some(subdirs.into_iter().map(Into::into).collect());
        self
    }

    fn admits_top_level(&self, name: &str) -> bool {
        self.subdirs
            .as_ref()
            .is_none_or(|list| list.iter().any(|s| s == name))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZipSummary {
    /// Directory and file entries written.
    pub entries: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnzipSummary {
    /// Entries extracted before finishing or stopping.
    pub entries: u64,
    /// The listener asked to stop; the output directory is partial.
    pub cancelled: bool,
}

/// Pack the tree under `source` into a new zip at `out_file`.
///
/// Entry names are relative to `source`, or to its parent when
/// `include_base_dir` is set. Directories get their own `name/` entries.
/// Any existing `out_file` is replaced.
///
/// Reads go through the async VFS, but the zip encoder writes `out_file`
/// with blocking I/O. Callers on a busy runtime should drive this from
/// [`tokio::task::spawn_blocking`].
pub async fn zip_dir(
    source: &FileHandle,
    out_file: &Path,
    options: &ZipOptions,
) -> ArchiveResult<ZipSummary> {
    if !source.is_dir().await {
        return Err(VfsError::not_a_directory(source.describe()).into());
    }

    match tokio::fs::remove_file(out_file).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    if let Some(parent) = out_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let out = tokio::fs::File::create(out_file).await?.into_std().await;
    let mut writer = ZipWriter::new(out);
    let file_options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut summary = ZipSummary::default();

    let anchor = match source.base_name() {
        Some(name) if options.include_base_dir => {
            writer.add_directory(format!("{name}/"), file_options)?;
            summary.entries += 1;
            RelativePath::parse(&name)
        }
        _ => RelativePath::root(),
    };

    add_tree(
        &mut writer,
        source,
        &anchor,
        RelativePath::root(),
        options,
        file_options,
        &mut summary,
    )
    .await?;
    writer.finish()?;

    tracing::info!(source = %source, out = %out_file.display(), entries = summary.entries, "wrote archive");
    Ok(summary)
}

fn add_tree<'a, W: Write + Seek + Send>(
    writer: &'a mut ZipWriter<W>,
    source: &'a FileHandle,
    anchor: &'a RelativePath,
    rel: RelativePath,
    options: &'a ZipOptions,
    file_options: SimpleFileOptions,
    summary: &'a mut ZipSummary,
) -> BoxFuture<'a, ArchiveResult<()>> {
    Box::pin(async move {
        let dir = source.open_path(&rel);
        for entry in dir.entries().await? {
            if entry.kind.is_dir() && rel.is_empty() && !options.admits_top_level(&entry.name) {
                continue;
            }
            let child = rel.join(&entry.name);
            let name = anchor.concat(&child).as_string();

            if entry.kind.is_dir() {
                writer.add_directory(format!("{name}/"), file_options)?;
                summary.entries += 1;
                add_tree(writer, source, anchor, child, options, file_options, summary).await?;
            } else {
                writer.start_file(name, file_options)?;
                let file = source.open_path(&child);
                let mut offset = 0u64;
                loop {
                    let chunk = file.fs().read(file.path(), offset, COPY_BUFFER_SIZE).await?;
                    if chunk.is_empty() {
                        break;
                    }
                    writer.write_all(&chunk)?;
                    offset += chunk.len() as u64;
                }
                summary.entries += 1;
            }
        }
        Ok(())
    })
}

/// Where `entry_name` would land under `root`, or `UnsafeEntry` if outside.
///
/// `root` must already be canonical.
fn contained_path(root: &Path, entry_name: &str) -> ArchiveResult<PathBuf> {
    let unsafe_entry = || ArchiveError::UnsafeEntry(entry_name.to_string());

    let candidate = normalize_lexically(&root.join(entry_name)).ok_or_else(unsafe_entry)?;
    if !canonicalize_existing_prefix(&candidate).starts_with(root) {
        return Err(unsafe_entry());
    }
    Ok(candidate)
}

/// Extract `in_file` into `out_dir`.
///
/// Every entry is checked before anything is written for it; an entry that
/// would resolve outside `out_dir` aborts extraction with
/// [`ArchiveError::UnsafeEntry`].
///
/// `listener(done, total)` is called first with zero and then after each
/// entry with the cumulative compressed size against the archive's size on
/// disk, so it only approximates progress. Returning `false` stops
/// extraction, leaving whatever was already written.
pub fn unzip(
    in_file: &Path,
    out_dir: &Path,
    mut listener: Option<&mut dyn FnMut(u64, u64) -> bool>,
) -> ArchiveResult<UnzipSummary> {
    let total = fs::metadata(in_file)?.len();
    let mut archive = ZipArchive::new(File::open(in_file)?)?;
    fs::create_dir_all(out_dir)?;
    let root = dunce::canonicalize(out_dir)?;

    let mut report = |done: u64| listener.as_deref_mut().is_none_or(|l| l(done, total));

    let mut summary = UnzipSummary::default();
    if !report(0) {
        summary.cancelled = true;
        return Ok(summary);
    }

    let mut done = 0u64;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let target = contained_path(&root, entry.name())?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
        }
        tracing::trace!(entry = entry.name(), "extracted");

        summary.entries += 1;
        done += entry.compressed_size();
        if !report(done) {
            tracing::info!(archive = %in_file.display(), entries = summary.entries, "extraction cancelled");
            summary.cancelled = true;
            return Ok(summary);
        }
    }

    tracing::info!(archive = %in_file.display(), out = %out_dir.display(), entries = summary.entries, "extracted archive");
    Ok(summary)
}
