//! # tbloader-kernel
//!
//! Filesystem plumbing for provisioning Talking Books.
//!
//! Everything a provisioning run touches (the device itself, a local
//! content cache, a staging directory) is reached through the same
//! [`VfsOps`] abstraction and addressed with [`RelativePath`]s, so the
//! copy engine, the archive packager and the device probe never see a
//! platform path.

pub mod archive;
pub mod device;
pub mod path;
pub mod sync;
pub mod vfs;

pub use archive::{ArchiveError, ArchiveResult, UnzipSummary, ZipOptions, ZipSummary, unzip, zip_dir};
pub use device::{
    DeploymentInfo, DeviceContext, DeviceGeneration, DeviceInfo, FlashData, FlashDataDecoder,
    NEED_SERIAL_NUMBER, UNKNOWN,
};
pub use path::RelativePath;
pub use sync::{CopyOptions, CopyOutcome, CopyStats, copy_dir, copy_file};
pub use vfs::{
    DirEntry, FileAttr, FileHandle, FileType, LocalBackend, MemoryBackend, VfsError, VfsOps,
    VfsResult, View,
};
