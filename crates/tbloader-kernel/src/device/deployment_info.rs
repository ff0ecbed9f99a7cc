//! Snapshot of what is currently deployed on a device.

use serde::Serialize;
use std::fmt;

use super::UNKNOWN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentInfo {
    pub serial_number: String,
    /// Project of the previous deployment; may be a caller-supplied fallback.
    pub project_name: String,
    pub deployment_name: String,
    pub package_names: Vec<String>,
    /// Directory name the statistics were last written to.
    pub update_directory: Option<String>,
    pub update_timestamp: Option<String>,
    pub firmware_revision: String,
    pub community: String,
    pub recipient_id: Option<String>,
    pub test_deployment: bool,
}

impl Default for DeploymentInfo {
    fn default() -> Self {
        Self {
            serial_number: UNKNOWN.into(),
            project_name: UNKNOWN.into(),
            deployment_name: UNKNOWN.into(),
            package_names: Vec::new(),
            update_directory: None,
            update_timestamp: None,
            firmware_revision: UNKNOWN.into(),
            community: UNKNOWN.into(),
            recipient_id: None,
            test_deployment: false,
        }
    }
}

impl DeploymentInfo {
    pub fn builder() -> DeploymentInfoBuilder {
        DeploymentInfoBuilder::default()
    }

    /// First package name, or UNKNOWN.
    pub fn package_name(&self) -> &str {
        self.package_names.first().map(String::as_str).unwrap_or(UNKNOWN)
    }
}

impl fmt::Display for DeploymentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} / {} / {} ({}), firmware {}",
            self.serial_number,
            self.project_name,
            self.deployment_name,
            self.package_names.join(","),
            self.community,
            self.firmware_revision
        )?;
        if self.test_deployment {
            f.write_str(" [test]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DeploymentInfoBuilder {
    info: DeploymentInfo,
}

impl DeploymentInfoBuilder {
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.info.serial_number = serial_number.into();
        self
    }

    pub fn with_project_name(mut self, project_name: impl Into<String>) -> Self {
        self.info.project_name = project_name.into();
        self
    }

    /// Use `fallback` only if no project is known.
    pub fn with_fallback_project_name(mut self, fallback: impl Into<String>) -> Self {
        if self.info.project_name.eq_ignore_ascii_case(UNKNOWN) {
            self.info.project_name = fallback.into();
        }
        self
    }

    pub fn with_deployment_name(mut self, deployment_name: impl Into<String>) -> Self {
        self.info.deployment_name = deployment_name.into();
        self
    }

    pub fn with_package_names(mut self, package_names: Vec<String>) -> Self {
        self.info.package_names = package_names;
        self
    }

    pub fn with_update_directory(mut self, dir: Option<String>) -> Self {
        self.info.update_directory = dir;
        self
    }

    pub fn with_update_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.info.update_timestamp = timestamp;
        self
    }

    pub fn with_firmware_revision(mut self, firmware: impl Into<String>) -> Self {
        self.info.firmware_revision = firmware.into();
        self
    }

    pub fn with_community(mut self, community: impl Into<String>) -> Self {
        self.info.community = community.into();
        self
    }

    pub fn with_recipient_id(mut self, recipient_id: Option<String>) -> Self {
        self.info.recipient_id = recipient_id;
        self
    }

    pub fn as_test_deployment(mut self, test: bool) -> Self {
        self.info.test_deployment = test;
        self
    }

    pub fn build(self) -> DeploymentInfo {
        self.info
    }
}
