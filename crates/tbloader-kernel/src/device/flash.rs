//! Embedded statistics record of first-generation devices.
//!
//! The binary layout belongs to the device firmware; decoding is delegated
//! to a [`FlashDataDecoder`] supplied by the caller.

use std::sync::Arc;

use crate::vfs::FileHandle;

/// Where the record lives, relative to the device root, in lookup order.
pub const FLASH_DATA_PATHS: [&str; 2] = ["system/flashData.bin", "flashData.bin"];

/// The fields provisioning cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashData {
    pub serial_number: Option<String>,
    pub community: Option<String>,
    pub image_name: Option<String>,
    pub deployment_number: Option<String>,
    /// `(year, month, day)` of the last update, if recorded.
    pub update_date: Option<(i32, u32, u32)>,
    /// `-1` marks a record the firmware never finished writing.
    pub count_reflashes: i32,
}

impl FlashData {
    pub fn is_valid(&self) -> bool {
        self.count_reflashes != -1
    }
}

pub trait FlashDataDecoder: Send + Sync {
    /// Decode a raw record, or `None` if the bytes are not one.
    fn decode(&self, bytes: &[u8]) -> Option<FlashData>;
}

/// Read and decode the first record found under `root`.
///
/// Records marked invalid are discarded.
pub async fn load_flash_data(
    root: &FileHandle,
    decoder: Option<&Arc<dyn FlashDataDecoder>>,
) -> Option<FlashData> {
    let decoder = decoder?;
    for path in FLASH_DATA_PATHS {
        let file = root.open(path);
        let Ok(bytes) = file.read_to_end().await else {
            continue;
        };
        let Some(data) = decoder.decode(&bytes) else {
            tracing::debug!(path = %file, "flash record did not decode");
            continue;
        };
        if !data.is_valid() {
            tracing::debug!(path = %file, "discarding unfinished flash record");
            return None;
        }
        return Some(data);
    }
    None
}
