// SPDX-License-Identifier: GPL-3.0-only

//! Drive lifecycle: attach, detach, mint and the boot-time checker
//!
//! Attaching stages the device under `<staging root>/<machine id>/<device>`,
//! validates (or heals) its identity and bind-mounts roaming drives at
//! `<roaming root>/<uuid>`. Mount failures abort only the drive at hand.

use crate::builder;
use crate::context::ZenfsContext;
use crate::error::{Result, ZenfsError};
use crate::identity;
use crate::roaming;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use zenfs_sys::{Mounter, Notifier};
use zenfs_types::{DrivePaths, DriveRecord, DriveType};

/// Label given to drives whose identity had to be regenerated
pub const RESTORED_LABEL: &str = "RestoredDrive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Roaming drive bound at its UUID path
    Bound { uuid: String, healed: bool },
    /// System drive validated and unstaged
    SystemDrive { uuid: String },
    /// Device already mounted under the roaming root
    AlreadyBound { mount_point: PathBuf },
    /// Device hosts the root filesystem
    SystemRoot,
    /// Device mounted somewhere unrelated
    InUse { mount_point: PathBuf },
    /// No identity and nothing to heal from
    Discarded,
}

impl AttachOutcome {
    pub fn is_bound(&self) -> bool {
        matches!(self, AttachOutcome::Bound { .. })
    }
}

pub struct DriveManager<'a> {
    ctx: &'a ZenfsContext,
    mounter: &'a dyn Mounter,
    notifier: &'a dyn Notifier,
}

impl<'a> DriveManager<'a> {
    pub fn new(
        ctx: &'a ZenfsContext,
        mounter: &'a dyn Mounter,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            ctx,
            mounter,
            notifier,
        }
    }

    fn notify(&self, summary: &str, body: &str) {
        if let Err(e) = self.notifier.notify(summary, body) {
            debug!("Notification failed: {}", e);
        }
    }

    /// Bare device names are looked up under the device directory.
    fn device_path(&self, device: &str) -> PathBuf {
        let path = Path::new(device);
        if path.components().count() > 1 {
            path.to_path_buf()
        } else {
            self.ctx.layout.dev_root.join(device)
        }
    }

    /// Stage, validate and bind one device.
    ///
    /// With `refresh` set, a bound or validated drive triggers a view refresh.
    pub fn attach(&self, device: &str, refresh: bool) -> Result<AttachOutcome> {
        let device = self.device_path(device);
        let name = device
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ZenfsError::InvalidDevice(device.display().to_string()))?
            .to_string();

        if let Some(outcome) = self.rejection(&device) {
            info!("Skipping {}: {:?}", name, outcome);
            return Ok(outcome);
        }

        let staging = self.ctx.layout.staging_mount(&self.ctx.machine_id, &name);
        fs::create_dir_all(&staging)?;

        let mut mounted_here = false;
        if !self.mounter.is_mounted(&staging)? {
            if let Err(e) = self.mounter.mount(&device, &staging) {
                let _ = fs::remove_dir(&staging);
                return Err(e.into());
            }
            mounted_here = true;
        }

        match self.attach_staged(&staging, refresh) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Attach failed on {}: {}", name, e);
                if mounted_here {
                    match self.mounter.unmount(&staging) {
                        Ok(()) => {
                            let _ = fs::remove_dir(&staging);
                        }
                        Err(unmount_err) => {
                            warn!("Leaving {:?} in place: {}", staging, unmount_err)
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn rejection(&self, device: &Path) -> Option<AttachOutcome> {
        let existing = match self.mounter.mounts_of(device) {
            Ok(mounts) => mounts,
            Err(e) => {
                debug!("Cannot inspect mounts of {:?}: {}", device, e);
                return None;
            }
        };

        let layout = &self.ctx.layout;
        let mount_root = layout.roaming_root.parent().unwrap_or(&layout.roaming_root);
        existing.into_iter().find_map(|mount_point| {
            if mount_point == Path::new("/") {
                Some(AttachOutcome::SystemRoot)
            } else if mount_point.starts_with(&layout.roaming_root) {
                Some(AttachOutcome::AlreadyBound { mount_point })
            } else if !mount_point.starts_with(&layout.staging_root)
                && !mount_point.starts_with(mount_root)
            {
                Some(AttachOutcome::InUse { mount_point })
            } else {
                None
            }
        })
    }

    fn attach_staged(&self, staging: &Path, refresh: bool) -> Result<AttachOutcome> {
        let (record, healed) = match identity::read(staging) {
            Some(record) => (record, false),
            None if DrivePaths::new(staging).zenfs_dir().is_dir() => {
                info!("Healing drive at {:?}", staging);
                (self.heal(staging)?, true)
            }
            None => {
                info!("No ZenFS identity at {:?}, discarding", staging);
                self.unstage(staging);
                return Ok(AttachOutcome::Discarded);
            }
        };

        if record.drive_type == DriveType::System {
            info!("Validated system drive {}", record.uuid);
            self.unstage(staging);
            if refresh {
                self.refresh_view();
            }
            return Ok(AttachOutcome::SystemDrive { uuid: record.uuid });
        }

        let target = self.ctx.layout.roaming_mount(&record.uuid);
        fs::create_dir_all(&target)?;
        if self.mounter.is_mounted(&target)? {
            debug!("{} already bound at {:?}", record.uuid, target);
        } else {
            if let Err(e) = self.mounter.bind(staging, &target) {
                let _ = fs::remove_dir(&target);
                return Err(e.into());
            }
            info!("Bound {} at {:?}", record.uuid, target);
            self.notify("ZenFS", &format!("Attached {}", record.uuid));
            if refresh {
                self.refresh_view();
            }
        }

        Ok(AttachOutcome::Bound {
            uuid: record.uuid,
            healed,
        })
    }

    fn heal(&self, staging: &Path) -> Result<DriveRecord> {
        let record = identity::new_record(RESTORED_LABEL, DriveType::Roaming);
        identity::write(staging, &record)?;
        builder::rebuild(staging, &record.uuid, &self.ctx.rules)?;
        Ok(record)
    }

    /// Best effort: unmount and drop the staging directory.
    fn unstage(&self, staging: &Path) {
        match self.mounter.unmount(staging) {
            Ok(()) => {
                let _ = fs::remove_dir(staging);
            }
            Err(e) => warn!("Failed to unstage {:?}: {}", staging, e),
        }
    }

    /// Unbind a roaming drive given its mount point or UUID.
    ///
    /// Returns `false` when nothing exists at the resolved path.
    pub fn detach(&self, target: &str) -> Result<bool> {
        let path = Path::new(target);
        let mount_point = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.ctx.layout.roaming_mount(target)
        };

        if fs::symlink_metadata(&mount_point).is_err() {
            warn!("Nothing to detach at {:?}", mount_point);
            return Ok(false);
        }

        info!("Detaching {:?}", mount_point);
        if let Err(e) = self.mounter.unmount(&mount_point) {
            self.notify("ZenFS Error", &format!("Detach failed: {e}"));
            return Err(e.into());
        }
        let _ = fs::remove_dir(&mount_point);

        let name = mount_point
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.notify("ZenFS", &format!("Detached {name}"));
        self.refresh_view();
        Ok(true)
    }

    /// Give a device a fresh identity and index it.
    pub fn mint(&self, device: &str, label: &str, drive_type: DriveType) -> Result<DriveRecord> {
        let device = self.device_path(device);
        let staging = self.ctx.layout.mint_staging.clone();
        info!("Minting {:?} as {}", device, drive_type);

        fs::create_dir_all(&staging)?;
        if let Err(e) = self.mounter.mount(&device, &staging) {
            self.notify("ZenFS Error", &format!("Mint failed: {e}"));
            return Err(e.into());
        }

        let result = self.write_new_identity(&staging, label, drive_type);

        if let Err(e) = self.mounter.unmount(&staging) {
            warn!("Failed to unmount {:?}: {}", staging, e);
        }

        match result {
            Ok(record) => {
                info!("Drive minted with UUID {}", record.uuid);
                self.notify("ZenFS Mint", &format!("Minted {label}"));
                Ok(record)
            }
            Err(e) => {
                error!("Mint error: {}", e);
                self.notify("ZenFS Error", &format!("Mint failed: {e}"));
                Err(e)
            }
        }
    }

    fn write_new_identity(
        &self,
        mount_point: &Path,
        label: &str,
        drive_type: DriveType,
    ) -> Result<DriveRecord> {
        let record = identity::new_record(label, drive_type);
        identity::write(mount_point, &record)?;
        builder::rebuild(mount_point, &record.uuid, &self.ctx.rules)?;
        Ok(record)
    }

    /// Attach every eligible block device in parallel, then refresh once.
    pub fn checker(&self) -> Result<Vec<(String, AttachOutcome)>> {
        let devices = eligible_devices(&self.ctx.layout.dev_root);
        if devices.is_empty() {
            info!("No candidate block devices");
            return Ok(Vec::new());
        }

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(devices.len());
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map_err(|e| ZenfsError::ThreadPoolBuild(e.to_string()))?;
        info!("Checking {} devices on {} threads", devices.len(), threads);

        let results: Vec<(String, Result<AttachOutcome>)> = pool.install(|| {
            devices
                .par_iter()
                .map(|device| (device.clone(), self.attach(device, false)))
                .collect()
        });

        let outcomes = results
            .into_iter()
            .filter_map(|(device, result)| match result {
                Ok(outcome) => Some((device, outcome)),
                Err(e) => {
                    debug!("Skipped {}: {}", device, e);
                    None
                }
            })
            .collect();

        self.refresh_view();
        Ok(outcomes)
    }

    /// Failures are logged; the view is rebuilt on the next refresh.
    pub fn refresh_view(&self) {
        if let Err(e) = roaming::sync(self.ctx, self.notifier) {
            error!("View refresh failed: {}", e);
        }
    }
}

/// `sd*` and `nvme*` partitions, sorted by name.
pub fn eligible_devices(dev_root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dev_root) else {
        return Vec::new();
    };
    let mut devices: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            (name.starts_with("sd") || name.starts_with("nvme"))
                && name.ends_with(|c: char| c.is_ascii_digit())
        })
        .collect();
    devices.sort();
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_partitions_are_eligible() {
        let temp = tempfile::tempdir().unwrap();
        for name in ["sda", "sda1", "sdb2", "nvme0n1", "nvme0n1p3", "loop0", "tty1"] {
            fs::write(temp.path().join(name), b"").unwrap();
        }
        assert_eq!(
            eligible_devices(temp.path()),
            vec!["nvme0n1", "nvme0n1p3", "sda1", "sdb2"]
        );
    }
}
