//! Allocator settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_BLOCK_SIZE: u32 = 20;
pub const DEFAULT_PRIVILEGED_BLOCK_SIZE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrnConfig {
    /// Base URL of the reservation service.
    pub endpoint: Option<String>,
    /// Numbers requested per block.
    pub block_size: u32,
    /// An identity that gets tiny blocks, so replenishment happens often.
    pub privileged_identity: Option<String>,
    pub privileged_block_size: u32,
    /// Allocation record store; defaults to the platform data dir.
    pub store_path: Option<PathBuf>,
}

impl Default for SrnConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            block_size: DEFAULT_BLOCK_SIZE,
            privileged_identity: None,
            privileged_block_size: DEFAULT_PRIVILEGED_BLOCK_SIZE,
            store_path: None,
        }
    }
}

impl SrnConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_block_size(mut self, size: u32) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_privileged_identity(mut self, identity: impl Into<String>, block_size: u32) -> Self {
        self.privileged_identity = Some(identity.into());
        self.privileged_block_size = block_size;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Block size for `identity`.
    pub fn block_size_for(&self, identity: &str) -> u32 {
        let size = match &self.privileged_identity {
            Some(privileged) if privileged.eq_ignore_ascii_case(identity) => self.privileged_block_size,
            _ => self.block_size,
        };
        size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_for() {
        let config = SrnConfig::default().with_privileged_identity("Dev@Example.org", 2);
        assert_eq!(config.block_size_for("dev@example.org"), 2);
        assert_eq!(config.block_size_for("amy@example.org"), DEFAULT_BLOCK_SIZE);
        assert_eq!(SrnConfig::default().with_block_size(0).block_size_for("x"), 1);
    }
}
