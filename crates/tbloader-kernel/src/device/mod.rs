//! Descriptor of a connected Talking Book.
//!
//! A device is probed once; the generation found then decides how the
//! hardware-specific attributes (serial number, firmware, last update) are
//! read. Everything else comes from a shared resolution chain:
//!
//! 1. the deployment record in `system/deployment.properties`
//! 2. the flash statistics record (first generation only)
//! 3. a single marker file named after the value, e.g. `UNICEF-2.prj`
//!
//! Nothing here fails. A damaged or half-written device is ordinary input,
//! and anything that cannot be determined reads as [`UNKNOWN`].

mod deployment_info;
mod flash;
mod properties;
mod serial;
mod v1;
mod v2;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::vfs::FileHandle;

pub use deployment_info::{DeploymentInfo, DeploymentInfoBuilder};
pub use flash::{FlashData, FlashDataDecoder, FLASH_DATA_PATHS, load_flash_data};
pub use properties::{DEPLOYMENT_PROPERTIES, DeploymentProperties};
pub use serial::{
    NEED_SERIAL_NUMBER, STARTING_SERIAL_NUMBER, has_prefix_format, is_new_style,
    new_serial_number_needed,
};

use v1::V1Device;
use v2::V2Device;

/// Value of any attribute that could not be determined.
pub const UNKNOWN: &str = "UNKNOWN";

/// Serial number prefix for devices provisioned by this tool.
pub const DEFAULT_SRN_PREFIX: &str = "B-";

pub const SYSTEM_DIR: &str = "system";
const LANGUAGES_DIR: &str = "languages";
const LISTS_DIR: &str = "messages/lists";
const AUDIO_DIR: &str = "messages/audio";

const V1_MARKERS: &[&[&str]] = &[&["config.txt", "profiles.txt"]];
const V2_MARKERS: &[&[&str]] = &[
    &["device_ID.txt", "firmware_ID.txt"],
    &["QC_Pass.txt", "bootcount.txt"],
];

/// Hardware generation, as determined by [`DeviceInfo::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceGeneration {
    /// Nothing mounted at the given root.
    None,
    /// Something is there, but it does not look like exactly one generation.
    Unknown,
    V1,
    V2,
}

impl fmt::Display for DeviceGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceGeneration::None => "none",
            DeviceGeneration::Unknown => "unknown",
            DeviceGeneration::V1 => "tbv1",
            DeviceGeneration::V2 => "tbv2",
        })
    }
}

/// Settings the probe needs from its caller.
#[derive(Clone)]
pub struct DeviceContext {
    pub srn_prefix: String,
    pub flash_decoder: Option<Arc<dyn FlashDataDecoder>>,
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self {
            srn_prefix: DEFAULT_SRN_PREFIX.to_string(),
            flash_decoder: None,
        }
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("srn_prefix", &self.srn_prefix)
            .field("flash_decoder", &self.flash_decoder.is_some())
            .finish()
    }
}

impl DeviceContext {
    pub fn with_srn_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.srn_prefix = prefix.into();
        self
    }

    pub fn with_flash_decoder(mut self, decoder: Arc<dyn FlashDataDecoder>) -> Self {
        self.flash_decoder = Some(decoder);
        self
    }
}

/// Locations and records shared by every generation.
#[derive(Debug)]
pub(crate) struct DeviceFiles {
    pub root: FileHandle,
    pub system: FileHandle,
    pub properties: Option<DeploymentProperties>,
    pub context: DeviceContext,
}

impl DeviceFiles {
    /// A record value, unless absent, empty or literally UNKNOWN.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .as_ref()?
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(UNKNOWN))
    }
}

/// What differs between hardware generations.
#[async_trait]
pub(crate) trait GenerationOps: Send + Sync {
    async fn serial_number(&mut self, files: &DeviceFiles) -> String;
    async fn firmware_version(&mut self, files: &DeviceFiles) -> String;
    async fn synch_dir(&mut self, files: &DeviceFiles) -> Option<String>;
    async fn last_update_date(&mut self, files: &DeviceFiles) -> String;
    async fn is_serial_number_format_good(&mut self, files: &DeviceFiles, candidate: &str) -> bool;
    async fn new_serial_number_needed(&mut self, files: &DeviceFiles) -> bool;
    async fn flash_data(&mut self, files: &DeviceFiles) -> Option<FlashData>;

    /// Record a newly assigned serial number. Returns false if the
    /// generation does not support it.
    fn set_serial_number(&mut self, _srn: &str) -> bool {
        false
    }
}

/// Shared behavior of devices that were not recognized.
#[derive(Debug, Default)]
struct Unrecognized;

#[async_trait]
impl GenerationOps for Unrecognized {
    async fn serial_number(&mut self, _files: &DeviceFiles) -> String {
        UNKNOWN.to_string()
    }

    async fn firmware_version(&mut self, _files: &DeviceFiles) -> String {
        UNKNOWN.to_string()
    }

    async fn synch_dir(&mut self, _files: &DeviceFiles) -> Option<String> {
        None
    }

    async fn last_update_date(&mut self, _files: &DeviceFiles) -> String {
        UNKNOWN.to_string()
    }

    async fn is_serial_number_format_good(&mut self, _files: &DeviceFiles, _candidate: &str) -> bool {
        false
    }

    async fn new_serial_number_needed(&mut self, _files: &DeviceFiles) -> bool {
        false
    }

    async fn flash_data(&mut self, _files: &DeviceFiles) -> Option<FlashData> {
        None
    }
}

#[derive(Debug)]
enum Variant {
    V1(V1Device),
    V2(V2Device),
    Unrecognized(Unrecognized),
}

impl Variant {
    fn ops(&mut self) -> &mut dyn GenerationOps {
        match self {
            Variant::V1(device) => device,
            Variant::V2(device) => device,
            Variant::Unrecognized(device) => device,
        }
    }
}

/// A probed device and its lazily resolved attributes.
#[derive(Debug)]
pub struct DeviceInfo {
    label: String,
    generation: DeviceGeneration,
    files: DeviceFiles,
    variant: Variant,
    corrupted: bool,
    project: Option<String>,
    deployment: Option<String>,
    community: Option<String>,
    packages: Option<Vec<String>>,
}

impl DeviceInfo {
    /// Inspect `root` and pick the matching generation.
    pub async fn probe(root: FileHandle, label: impl Into<String>, context: DeviceContext) -> Self {
        let label = label.into();
        let system = root.open(SYSTEM_DIR);

        let generation = if !root.is_dir().await {
            DeviceGeneration::None
        } else {
            detect_generation(&system).await
        };
        let properties = match generation {
            DeviceGeneration::None => None,
            _ => DeploymentProperties::load(&system).await,
        };
        let variant = match generation {
            DeviceGeneration::V1 => Variant::V1(V1Device::default()),
            DeviceGeneration::V2 => Variant::V2(V2Device::default()),
            DeviceGeneration::None | DeviceGeneration::Unknown => Variant::Unrecognized(Unrecognized),
        };

        tracing::debug!(
            root = %root,
            label = %label,
            generation = %generation,
            has_record = properties.is_some(),
            "probed device"
        );

        Self {
            label,
            generation,
            files: DeviceFiles {
                root,
                system,
                properties,
                context,
            },
            variant,
            corrupted: false,
            project: None,
            deployment: None,
            community: None,
            packages: None,
        }
    }

    pub fn generation(&self) -> DeviceGeneration {
        self.generation
    }

    pub fn root(&self) -> &FileHandle {
        &self.files.root
    }

    pub fn system_dir(&self) -> &FileHandle {
        &self.files.system
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The label minus a trailing drive letter, e.g. `TB (E:)` becomes `TB`.
    pub fn label_without_drive_letter(&self) -> &str {
        match self.label.rfind('(') {
            Some(index) if index > 0 => {
                let cut = self.label[..index]
                    .char_indices()
                    .last()
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                &self.label[..cut]
            }
            _ => &self.label,
        }
    }

    pub fn set_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    pub fn properties(&self) -> Option<&DeploymentProperties> {
        self.files.properties.as_ref()
    }

    /// Whether something that looks like a device is reachable.
    ///
    /// With `check_has_system`, the content directories a provisioned device
    /// always carries must also be present.
    pub async fn check_connection(&self, check_has_system: bool) -> bool {
        let root = &self.files.root;
        let Ok(names) = root.list().await else {
            return false;
        };
        if !check_has_system {
            return true;
        }
        if names.is_empty() {
            return false;
        }
        for dir in [SYSTEM_DIR, LANGUAGES_DIR, LISTS_DIR, AUDIO_DIR] {
            if !root.open(dir).exists().await {
                return false;
            }
        }
        true
    }

    pub async fn serial_number(&mut self) -> String {
        self.variant.ops().serial_number(&self.files).await
    }

    pub async fn firmware_version(&mut self) -> String {
        self.variant.ops().firmware_version(&self.files).await
    }

    pub async fn synch_dir(&mut self) -> Option<String> {
        self.variant.ops().synch_dir(&self.files).await
    }

    pub async fn last_update_date(&mut self) -> String {
        self.variant.ops().last_update_date(&self.files).await
    }

    pub async fn is_serial_number_format_good(&mut self, candidate: &str) -> bool {
        self.variant
            .ops()
            .is_serial_number_format_good(&self.files, candidate)
            .await
    }

    pub async fn new_serial_number_needed(&mut self) -> bool {
        self.variant.ops().new_serial_number_needed(&self.files).await
    }

    pub async fn flash_data(&mut self) -> Option<FlashData> {
        self.variant.ops().flash_data(&self.files).await
    }

    /// Adopt a freshly allocated serial number. Returns false on
    /// generations whose serial number is fixed by the hardware.
    pub fn set_serial_number(&mut self, srn: &str) -> bool {
        self.variant.ops().set_serial_number(srn)
    }

    pub async fn project_name(&mut self) -> String {
        if let Some(project) = &self.project {
            return project.clone();
        }
        let project = match self.files.property(properties::PROJECT) {
            Some(value) => value.to_string(),
            None => single_marker(&self.files.system, ".prj").await,
        };
        remember(&mut self.project, project)
    }

    pub async fn deployment_name(&mut self) -> String {
        if let Some(deployment) = &self.deployment {
            return deployment.clone();
        }
        let mut deployment = self.files.property(properties::DEPLOYMENT).map(str::to_string);
        if deployment.is_none() {
            deployment = self.flash_data().await.and_then(|f| f.deployment_number);
        }
        let deployment = match deployment {
            Some(value) => value,
            None => single_marker(&self.files.system, ".dep").await,
        };
        remember(&mut self.deployment, deployment)
    }

    pub async fn community_name(&mut self) -> String {
        if let Some(community) = &self.community {
            return community.clone();
        }
        let mut community = self.files.property(properties::COMMUNITY).map(str::to_string);
        if community.is_none() {
            community = self.flash_data().await.and_then(|f| f.community);
        }
        let community = match community {
            Some(value) => value,
            None => {
                let mut names = marker_names(&self.files.root, ".loc").await;
                if names.is_empty() {
                    names = marker_names(&self.files.system, ".loc").await;
                }
                exactly_one(names)
            }
        };
        remember(&mut self.community, community)
    }

    /// Packages of the last deployment; `["UNKNOWN"]` if none can be found.
    pub async fn package_names(&mut self) -> Vec<String> {
        if let Some(packages) = &self.packages {
            return packages.clone();
        }
        let mut packages: Vec<String> = self
            .files
            .property(properties::PACKAGE)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if packages.is_empty() {
            if let Some(image) = self.flash_data().await.and_then(|f| f.image_name) {
                packages.push(image);
            }
        }
        if packages.is_empty() {
            packages.push(single_marker(&self.files.system, ".pkg").await);
        }
        if packages.iter().any(|p| p != UNKNOWN) {
            self.packages = Some(packages.clone());
        }
        packages
    }

    pub fn recipient_id(&self) -> Option<String> {
        self.raw_property(properties::RECIPIENT_ID)
    }

    pub fn deployment_uuid(&self) -> Option<String> {
        self.raw_property(properties::DEPLOYMENT_UUID)
    }

    pub fn deployment_username(&self) -> Option<String> {
        self.raw_property(properties::USERNAME)
    }

    pub fn deployment_tbcdid(&self) -> Option<String> {
        self.raw_property(properties::TBCDID)
    }

    pub fn is_test_deployment(&self) -> bool {
        self.raw_property(properties::TEST_DEPLOYMENT)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    fn raw_property(&self, key: &str) -> Option<String> {
        self.files
            .properties
            .as_ref()
            .and_then(|p| p.get(key))
            .map(str::to_string)
    }

    /// Summary of what the device currently holds.
    ///
    /// `fallback_project` replaces an unknown project name. Returns `None`
    /// when no device is present.
    pub async fn deployment_info(&mut self, fallback_project: Option<&str>) -> Option<DeploymentInfo> {
        if self.generation == DeviceGeneration::None {
            return None;
        }
        let mut builder = DeploymentInfo::builder()
            .with_serial_number(self.serial_number().await)
            .with_project_name(self.project_name().await)
            .with_deployment_name(self.deployment_name().await)
            .with_package_names(self.package_names().await)
            .with_update_directory(self.synch_dir().await)
            .with_update_timestamp(Some(self.last_update_date().await).filter(|d| d != UNKNOWN))
            .with_firmware_revision(self.firmware_version().await)
            .with_community(self.community_name().await)
            .with_recipient_id(self.recipient_id())
            .as_test_deployment(self.is_test_deployment());
        if let Some(fallback) = fallback_project {
            builder = builder.with_fallback_project_name(fallback);
        }
        Some(builder.build())
    }
}

async fn detect_generation(system: &FileHandle) -> DeviceGeneration {
    let names = system.list().await.unwrap_or_default();
    let matches = |groups: &[&[&str]]| {
        groups.iter().any(|group| {
            group
                .iter()
                .all(|marker| names.iter().any(|n| n.eq_ignore_ascii_case(marker)))
        })
    };
    match (matches(V1_MARKERS), matches(V2_MARKERS)) {
        (true, false) => DeviceGeneration::V1,
        (false, true) => DeviceGeneration::V2,
        _ => DeviceGeneration::Unknown,
    }
}

fn remember(slot: &mut Option<String>, value: String) -> String {
    if value != UNKNOWN {
        *slot = Some(value.clone());
    }
    value
}

/// Case-insensitive extension match; the bare extension does not count.
pub(crate) fn has_extension(name: &str, ext: &str) -> bool {
    name.len() > ext.len()
        && name
            .get(name.len() - ext.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(ext))
}

/// Stems of entries in `dir` carrying `ext`, in listing order.
pub(crate) async fn marker_names(dir: &FileHandle, ext: &str) -> Vec<String> {
    dir.list_filtered(|name| has_extension(name, ext))
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|name| name[..name.len() - ext.len()].to_string())
        .collect()
}

async fn single_marker(dir: &FileHandle, ext: &str) -> String {
    exactly_one(marker_names(dir, ext).await)
}

fn exactly_one(mut names: Vec<String>) -> String {
    match names.len() {
        1 => names.remove(0),
        _ => UNKNOWN.to_string(),
    }
}
