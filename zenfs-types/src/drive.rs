// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Length of a ZenFS drive UUID.
pub const UUID_LEN: usize = 16;

/// Owner values that mean "stored locally, no redirection".
pub const LOCAL_SENTINELS: &[&str] = &[".", "system"];

/// Role of a drive inside the system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveType {
    /// Primary storage; carries identity but is never bound into the roaming tree
    System,
    /// Removable or networked storage unioned into the user's home when mounted
    #[default]
    Roaming,
}

impl DriveType {
    pub fn as_str(self) -> &'static str {
        match self {
            DriveType::System => "system",
            DriveType::Roaming => "roaming",
        }
    }
}

impl fmt::Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DriveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(DriveType::System),
            "roaming" => Ok(DriveType::Roaming),
            other => Err(format!("unknown drive type: {other}")),
        }
    }
}

// Unknown or missing types fall back to roaming rather than invalidating the record.
impl<'de> Deserialize<'de> for DriveType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value
            .and_then(|s| s.parse().ok())
            .unwrap_or(DriveType::Roaming))
    }
}

/// Identity record stored at `System/ZenFS/drive.json` on every drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveRecord {
    pub uuid: String,

    #[serde(default)]
    pub label: String,

    #[serde(rename = "type", default)]
    pub drive_type: DriveType,

    /// Unix timestamp (seconds)
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
}

impl DriveRecord {
    /// A record is trusted only when its UUID has the canonical shape.
    pub fn is_valid(&self) -> bool {
        is_valid_uuid(&self.uuid)
    }

    /// Parse and validate a record; any malformed input is treated as absent.
    pub fn from_json(input: &str) -> Option<Self> {
        let record: DriveRecord = serde_json::from_str(input).ok()?;
        record.is_valid().then_some(record)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Exactly 16 ASCII alphanumeric characters.
pub fn is_valid_uuid(uuid: &str) -> bool {
    uuid.len() == UUID_LEN && uuid.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Whether an owner string denotes local storage for the given machine.
pub fn is_local_owner(owner: &str, machine_id: &str) -> bool {
    LOCAL_SENTINELS.contains(&owner) || owner == machine_id
}
