//! `config.toml` for the `tbloader` binary.
//!
//! ```toml
//! log_filter = "tbloader_kernel=debug,info"
//!
//! [device]
//! srn_prefix = "B-"
//!
//! [srn]
//! endpoint = "https://example.org/Prod"
//! block_size = 20
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use tbloader_kernel::device::DEFAULT_SRN_PREFIX;
use tbloader_srn::SrnConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    pub device: DeviceConfig,
    pub srn: SrnConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub srn_prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            srn_prefix: DEFAULT_SRN_PREFIX.to_string(),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tbloader").join("config.toml"))
    }

    /// Read `explicit`, which must exist, or else the default file if there
    /// is one.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_for_missing_sections() {
        let config = Config::parse("log_filter = \"debug\"\n").unwrap();
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert_eq!(config.device.srn_prefix, "B-");
        assert_eq!(config.srn.block_size, 20);
        assert_eq!(config.srn.privileged_block_size, 2);
    }

    #[test]
    fn test_full_file() {
        let config = Config::parse(
            r#"
            [device]
            srn_prefix = "A-"

            [srn]
            endpoint = "https://example.org/Prod"
            block_size = 50
            privileged_identity = "dev@example.org"
            store_path = "/var/lib/tbloader/srn.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.device.srn_prefix, "A-");
        assert_eq!(config.srn.endpoint.as_deref(), Some("https://example.org/Prod"));
        assert_eq!(config.srn.block_size_for("dev@example.org"), 2);
        assert_eq!(config.srn.block_size_for("amy@example.org"), 50);
        assert_eq!(config.srn.store_path, Some(PathBuf::from("/var/lib/tbloader/srn.json")));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[srn]\nblock_size = 7\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().srn.block_size, 7);
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert!(Config::parse("[srn\n").is_err());
    }
}
