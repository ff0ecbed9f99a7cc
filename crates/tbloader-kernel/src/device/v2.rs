//! Second-generation devices report their identity in plain text files
//! written by the firmware itself.

use async_trait::async_trait;

use super::flash::FlashData;
use super::properties::{FIRMWARE, TALKING_BOOK_ID};
use super::{DeviceFiles, GenerationOps, UNKNOWN};

const DEVICE_ID: &str = "device_ID.txt";
const FIRMWARE_ID: &str = "firmware_ID.txt";

#[derive(Debug, Default)]
pub(crate) struct V2Device {
    device_id: Option<Option<String>>,
}

impl V2Device {
    /// The firmware's own record of the serial number, read once.
    async fn device_id(&mut self, files: &DeviceFiles) -> Option<String> {
        if self.device_id.is_none() {
            self.device_id = Some(read_trimmed(files, DEVICE_ID).await);
        }
        self.device_id.clone().flatten()
    }
}

async fn read_trimmed(files: &DeviceFiles, name: &str) -> Option<String> {
    let text = files.system.open(name).read_to_string().await.ok()?;
    Some(text.trim().to_string()).filter(|t| !t.is_empty())
}

#[async_trait]
impl GenerationOps for V2Device {
    async fn serial_number(&mut self, files: &DeviceFiles) -> String {
        if let Some(id) = self.device_id(files).await {
            return id;
        }
        files
            .property(TALKING_BOOK_ID)
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    async fn firmware_version(&mut self, files: &DeviceFiles) -> String {
        if let Some(firmware) = read_trimmed(files, FIRMWARE_ID).await {
            return firmware;
        }
        files
            .property(FIRMWARE)
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    async fn synch_dir(&mut self, _files: &DeviceFiles) -> Option<String> {
        None
    }

    async fn last_update_date(&mut self, _files: &DeviceFiles) -> String {
        UNKNOWN.to_string()
    }

    /// Only the number the firmware already holds is acceptable.
    async fn is_serial_number_format_good(&mut self, files: &DeviceFiles, candidate: &str) -> bool {
        self.device_id(files).await.as_deref() == Some(candidate)
    }

    async fn new_serial_number_needed(&mut self, _files: &DeviceFiles) -> bool {
        false
    }

    async fn flash_data(&mut self, _files: &DeviceFiles) -> Option<FlashData> {
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::device::tests::device_with;
    use crate::device::{DeviceContext, DeviceGeneration, DeviceInfo, UNKNOWN};

    #[tokio::test]
    async fn test_identity_from_firmware_files() {
        let root = device_with(&[
            ("system/device_ID.txt", "  B-00120345\n"),
            ("system/firmware_ID.txt", "v2.1.7\n"),
            ("system/deployment.properties", "TALKINGBOOKID=B-00120999\nFIRMWARE=old\n"),
        ])
        .await;
        let mut device = DeviceInfo::probe(root, "", DeviceContext::default()).await;
        assert_eq!(device.generation(), DeviceGeneration::V2);
        assert_eq!(device.serial_number().await, "B-00120345");
        assert_eq!(device.firmware_version().await, "v2.1.7");
        assert!(device.is_serial_number_format_good("B-00120345").await);
        assert!(!device.is_serial_number_format_good("B-00120999").await);
        assert!(!device.new_serial_number_needed().await);
        assert!(!device.set_serial_number("B-00120400"));
    }

    #[tokio::test]
    async fn test_falls_back_to_record() {
        let root = device_with(&[
            ("system/QC_Pass.txt", ""),
            ("system/bootcount.txt", "12"),
            ("system/deployment.properties", "TALKINGBOOKID=B-00120999\nFIRMWARE=v2.0.1\n"),
        ])
        .await;
        let mut device = DeviceInfo::probe(root, "", DeviceContext::default()).await;
        assert_eq!(device.serial_number().await, "B-00120999");
        assert_eq!(device.firmware_version().await, "v2.0.1");
        assert!(!device.is_serial_number_format_good("B-00120999").await);
        assert_eq!(device.synch_dir().await, None);
        assert_eq!(device.last_update_date().await, UNKNOWN);
        assert!(device.flash_data().await.is_none());
    }

    #[tokio::test]
    async fn test_nothing_recorded() {
        let root = device_with(&[("system/QC_Pass.txt", ""), ("system/bootcount.txt", "")]).await;
        let mut device = DeviceInfo::probe(root, "", DeviceContext::default()).await;
        assert_eq!(device.serial_number().await, UNKNOWN);
        assert_eq!(device.firmware_version().await, UNKNOWN);
    }
}
