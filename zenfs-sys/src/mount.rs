// SPDX-License-Identifier: GPL-3.0-only

//! Mount, bind and unmount through the system tools

use crate::error::{Result, SysError};
use crate::mountinfo::{entry_at, mount_points_of, read_mount_table};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use which::which;

/// Host mount operations used by the drive lifecycle
pub trait Mounter: Send + Sync {
    /// Every mount point where `device` is currently mounted
    fn mounts_of(&self, device: &Path) -> Result<Vec<PathBuf>>;

    /// Whether something is mounted exactly at `target`
    fn is_mounted(&self, target: &Path) -> Result<bool>;

    fn mount(&self, device: &Path, target: &Path) -> Result<()>;

    fn bind(&self, source: &Path, target: &Path) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;
}

/// `mount(8)` / `umount(8)` wrapper
pub struct MountTool {
    mount_path: PathBuf,
    umount_path: PathBuf,
}

impl MountTool {
    /// Locate the mount tools in PATH
    ///
    /// Returns an error if either binary is missing
    pub fn new() -> Result<Self> {
        let mount_path = which("mount").map_err(|_| SysError::ToolNotFound("mount".into()))?;
        let umount_path = which("umount").map_err(|_| SysError::ToolNotFound("umount".into()))?;
        debug!("Using {:?} and {:?}", mount_path, umount_path);
        Ok(Self {
            mount_path,
            umount_path,
        })
    }

    fn run(&self, binary: &Path, args: &[&OsStr]) -> Result<()> {
        let rendered = render(binary, args);
        debug!("Running {}", rendered);

        let output = Command::new(binary)
            .args(args)
            .output()
            .map_err(|e| SysError::CommandFailed {
                command: rendered.clone(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{} failed: {}", rendered, stderr);
            return Err(SysError::CommandFailed {
                command: rendered,
                stderr,
            });
        }

        Ok(())
    }
}

impl Mounter for MountTool {
    fn mounts_of(&self, device: &Path) -> Result<Vec<PathBuf>> {
        let table = read_mount_table()?;
        Ok(mount_points_of(&table, device))
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        let canonical = target
            .canonicalize()
            .unwrap_or_else(|_| target.to_path_buf());
        let table = read_mount_table()?;
        Ok(entry_at(&table, &canonical).is_some())
    }

    fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        info!("Mounting {:?} at {:?}", device, target);
        self.run(&self.mount_path, &[device.as_os_str(), target.as_os_str()])
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        info!("Binding {:?} to {:?}", source, target);
        self.run(
            &self.mount_path,
            &[OsStr::new("--bind"), source.as_os_str(), target.as_os_str()],
        )
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        info!("Unmounting {:?}", target);
        self.run(&self.umount_path, &[target.as_os_str()])
    }
}

fn render(binary: &Path, args: &[&OsStr]) -> String {
    let mut rendered = binary.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
