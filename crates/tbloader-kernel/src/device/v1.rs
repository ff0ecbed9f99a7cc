//! First-generation devices: serial number and statistics live in files the
//! firmware and the previous provisioning run left behind.

use async_trait::async_trait;

use super::flash::{FlashData, load_flash_data};
use super::properties::TALKING_BOOK_ID;
use super::serial::{NEED_SERIAL_NUMBER, has_prefix_format, is_new_style, new_serial_number_needed};
use super::{DeviceFiles, GenerationOps, UNKNOWN, marker_names};

const LAST_UPDATED: &str = "last_updated.txt";

#[derive(Debug, Default)]
pub(crate) struct V1Device {
    serial: Option<String>,
    needs_new_serial: bool,
    flash: Option<Option<FlashData>>,
}

impl V1Device {
    async fn load_serial(&mut self, files: &DeviceFiles) -> String {
        if let Some(srn) = &self.serial {
            return srn.clone();
        }
        let prefix = files.context.srn_prefix.as_str();
        let flash_srn = self
            .flash_data(files)
            .await
            .and_then(|f| f.serial_number)
            .filter(|s| has_prefix_format(prefix, s));

        let (mut srn, source) = match (files.property(TALKING_BOOK_ID), flash_srn) {
            (Some(recorded), Some(flash))
                if is_new_style(recorded) && is_new_style(&flash) && !recorded.eq_ignore_ascii_case(&flash) =>
            {
                tracing::warn!(recorded, flash = %flash, "serial number record and flash disagree");
                (NEED_SERIAL_NUMBER.to_string(), "conflict")
            }
            (Some(recorded), _) => (recorded.to_string(), "properties"),
            (None, Some(flash)) => (flash, "flash"),
            (None, None) => (srn_marker(files).await, "marker"),
        };
        srn = srn.to_uppercase();
        if !is_new_style(&srn) {
            srn = NEED_SERIAL_NUMBER.to_string();
        }
        self.needs_new_serial = new_serial_number_needed(prefix, &srn);
        tracing::debug!(srn = %srn, source, needs_new = self.needs_new_serial, "resolved serial number");

        self.serial = Some(srn.clone());
        srn
    }
}

/// First `*.srn` marker in the system directory, ignoring erase requests.
async fn srn_marker(files: &DeviceFiles) -> String {
    let names = files
        .system
        .list_filtered(|name| {
            let lower = name.to_ascii_lowercase();
            lower.ends_with(".srn") && !lower.starts_with("-erase")
        })
        .await
        .unwrap_or_default();
    names
        .first()
        .map(|name| name[..name.len() - 4].to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// `2024y03m15d10h...` becomes `2024/03/15`.
fn date_from_synch_dir(synch_dir: &str) -> Option<String> {
    let y = synch_dir.find('y')?;
    let m = synch_dir.find('m')?;
    let d = synch_dir.find('d')?;
    if !(y < m && m < d) {
        return None;
    }
    Some(format!(
        "{}/{}/{}",
        &synch_dir[..y],
        &synch_dir[y + 1..m],
        &synch_dir[m + 1..d]
    ))
}

#[async_trait]
impl GenerationOps for V1Device {
    async fn serial_number(&mut self, files: &DeviceFiles) -> String {
        self.load_serial(files).await
    }

    async fn firmware_version(&mut self, files: &DeviceFiles) -> String {
        let mut names = marker_names(&files.system, ".rev").await;
        if names.is_empty() {
            names = marker_names(&files.system, ".img").await;
        }
        match names.as_slice() {
            [only] => only.to_lowercase(),
            _ => UNKNOWN.to_string(),
        }
    }

    async fn synch_dir(&mut self, files: &DeviceFiles) -> Option<String> {
        let text = files.system.open(LAST_UPDATED).read_to_string().await.ok()?;
        text.lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }

    async fn last_update_date(&mut self, files: &DeviceFiles) -> String {
        if let Some((year, month, day)) = self.flash_data(files).await.and_then(|f| f.update_date) {
            return format!("{year}/{month}/{day}");
        }
        self.synch_dir(files)
            .await
            .and_then(|dir| date_from_synch_dir(&dir))
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    async fn is_serial_number_format_good(&mut self, files: &DeviceFiles, candidate: &str) -> bool {
        has_prefix_format(&files.context.srn_prefix, candidate)
    }

    async fn new_serial_number_needed(&mut self, files: &DeviceFiles) -> bool {
        self.load_serial(files).await;
        self.needs_new_serial
    }

    async fn flash_data(&mut self, files: &DeviceFiles) -> Option<FlashData> {
        if self.flash.is_none() {
            let data = load_flash_data(&files.root, files.context.flash_decoder.as_ref()).await;
            self.flash = Some(data);
        }
        self.flash.clone().flatten()
    }

    fn set_serial_number(&mut self, srn: &str) -> bool {
        self.serial = Some(srn.to_string());
        self.needs_new_serial = false;
        true
    }
}
