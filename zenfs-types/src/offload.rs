// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Files at or below this size are never offloaded (50 MiB)
pub const DEFAULT_MIN_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Drives at or above this usage never receive offloaded files
pub const NEAR_FULL_CEILING: f64 = 99.0;

/// Capacity offload settings, read from the JSON file passed to `offload -c`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OffloadConfig {
    /// Primary-storage usage percentage that triggers a pass
    pub offload_threshold: f64,

    /// Roaming usage percentage below which a drive is a preferred target
    pub roaming_safe_limit: f64,

    /// UUID of the primary drive, informational
    pub main_drive: Option<String>,

    /// Candidate size floor in bytes
    pub min_file_size: u64,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            offload_threshold: 80.0,
            roaming_safe_limit: 90.0,
            main_drive: None,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
        }
    }
}

impl OffloadConfig {
    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_keys_with_defaults() {
        let cfg = OffloadConfig::from_json(
            r#"{"offloadThreshold": 85, "mainDrive": "Ab3dEf7hIj9kLm0p", "unknown": 1}"#,
        )
        .unwrap();
        assert_eq!(cfg.offload_threshold, 85.0);
        assert_eq!(cfg.roaming_safe_limit, 90.0);
        assert_eq!(cfg.main_drive.as_deref(), Some("Ab3dEf7hIj9kLm0p"));
        assert_eq!(cfg.min_file_size, DEFAULT_MIN_FILE_SIZE);
    }
}
