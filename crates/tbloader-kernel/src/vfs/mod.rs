//! Virtual Filesystem abstraction.
//!
//! The same copy, archive and probe code runs against a mounted Talking
//! Book, a workstation staging directory, or an in-memory tree.
//!
//! - [`VfsOps`] - Storage primitives every backend implements
//! - [`LocalBackend`] - Local filesystem access (with path security)
//! - [`MemoryBackend`] - In-memory filesystem (device stand-in, testing)
//! - [`View`] - Re-roots another filesystem at a fixed prefix
//! - [`FileHandle`] - One node plus the checked per-path operations
//!
//! ## Design Decisions
//!
//! - **Path-based, no open-file state**: read/write take offset and size.
//! - **Primitives vs. policy**: backends only implement single-step
//!   operations; `mkdirs`, overwrite and recursive delete are written once
//!   on [`FileHandle`].

pub mod backends;
mod error;
mod handle;
mod ops;
mod types;
mod view;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{VfsError, VfsResult};
pub use handle::FileHandle;
pub use ops::VfsOps;
pub use types::{DirEntry, FileAttr, FileType};
pub use view::View;
