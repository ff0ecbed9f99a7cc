//! # tbloader-srn
//!
//! Serial numbers for Talking Books are issued from blocks reserved in
//! advance from a central authority, so a provisioning machine can keep
//! working for a while without a network connection.
//!
//! - [`SrnAllocationInfo`]: the block bookkeeping for one identity
//! - [`SrnStore`]: where that bookkeeping is persisted
//! - [`ReservationAuthority`]: where new blocks come from
//! - [`SrnAllocator`]: ties the three together

pub mod allocation;
pub mod allocator;
pub mod authority;
pub mod config;
pub mod error;
pub mod store;

pub use allocation::{Reservation, SrnAllocationInfo};
pub use allocator::SrnAllocator;
pub use authority::{HttpReservationAuthority, ReservationAuthority};
pub use config::SrnConfig;
pub use error::{SrnError, SrnResult};
pub use store::{JsonFileStore, MemoryStore, STORE_FILE_NAME, SrnStore};
