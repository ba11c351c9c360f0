// SPDX-License-Identifier: GPL-3.0-only

//! Drive identity store
//!
//! Reads and writes the `drive.json` record carried by every drive. A record
//! whose UUID is not exactly 16 alphanumeric characters is treated as absent.

use crate::error::Result;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fs;
use std::path::Path;
use tracing::debug;
use zenfs_types::{DrivePaths, DriveRecord, DriveType, UUID_LEN};

/// Read the identity of the drive mounted at `mount_point`.
pub fn read(mount_point: &Path) -> Option<DriveRecord> {
    let path = DrivePaths::new(mount_point).identity_file();
    let content = fs::read_to_string(&path).ok()?;
    let record = DriveRecord::from_json(&content);
    if record.is_none() {
        debug!("Ignoring malformed identity at {:?}", path);
    }
    record
}

/// Write (or replace) the identity of the drive mounted at `mount_point`.
pub fn write(mount_point: &Path, record: &DriveRecord) -> Result<()> {
    let path = DrivePaths::new(mount_point).identity_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, record.to_json()?)?;
    Ok(())
}

/// 16 random alphanumeric characters. Collisions are not checked.
pub fn generate_uuid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UUID_LEN)
        .map(char::from)
        .collect()
}

/// A fresh record stamped with the current time
pub fn new_record(label: &str, drive_type: DriveType) -> DriveRecord {
    DriveRecord {
        uuid: generate_uuid(),
        label: label.to_string(),
        drive_type,
        created_at: chrono::Utc::now().timestamp(),
    }
}
