// SPDX-License-Identifier: GPL-3.0-only

//! Fake host adapters for driving ZenFS against a temporary directory
//!
//! Mounting is simulated by swapping the (empty) target directory for a
//! symlink to the device's fixture directory; unmounting restores the empty
//! directory.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use zenfs_core::ZenfsContext;
use zenfs_sys::{Mounter, Notifier, SysError, UsageSource};
use zenfs_types::{IgnoreRules, Layout};

pub const MACHINE_ID: &str = "Mach1neIdentity0";

pub struct Host {
    pub temp: TempDir,
    pub ctx: ZenfsContext,
}

impl Host {
    pub fn new() -> Self {
        Self::with_rules(IgnoreRules::default())
    }

    pub fn with_rules(rules: IgnoreRules) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(temp.path());
        fs::create_dir_all(&layout.dev_root).unwrap();
        let ctx = ZenfsContext::new(layout, rules, MACHINE_ID);
        Self { temp, ctx }
    }

    pub fn layout(&self) -> &Layout {
        &self.ctx.layout
    }

    /// Create an empty fixture directory standing in for device `name`.
    pub fn device(&self, mounter: &FakeMounter, name: &str) -> PathBuf {
        let fixture = self.temp.path().join("fixtures").join(name);
        fs::create_dir_all(&fixture).unwrap();
        let node = self.layout().dev_root.join(name);
        fs::write(&node, b"").unwrap();
        mounter.add_device(&node, &fixture);
        fixture
    }

    pub fn home(&self, user: &str) -> PathBuf {
        let home = self.layout().real_home(user);
        fs::create_dir_all(&home).unwrap();
        home
    }
}

#[derive(Default)]
struct MountState {
    /// `(device, target)` in mount order
    mounts: Vec<(PathBuf, PathBuf)>,
    binds: usize,
}

#[derive(Default)]
pub struct FakeMounter {
    devices: Mutex<HashMap<PathBuf, PathBuf>>,
    state: Mutex<MountState>,
    refuse_binds: AtomicBool,
}

impl FakeMounter {
    pub fn add_device(&self, device: &Path, fixture: &Path) {
        self.devices
            .lock()
            .unwrap()
            .insert(device.to_path_buf(), fixture.to_path_buf());
    }

    /// Record a mount made outside ZenFS.
    pub fn preexisting(&self, device: &Path, target: &Path) {
        self.state
            .lock()
            .unwrap()
            .mounts
            .push((device.to_path_buf(), target.to_path_buf()));
    }

    /// Make every later bind fail.
    pub fn refuse_binds(&self) {
        self.refuse_binds.store(true, Ordering::SeqCst);
    }

    pub fn bind_count(&self) -> usize {
        self.state.lock().unwrap().binds
    }

    pub fn mounted_targets(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .mounts
            .iter()
            .map(|(_, target)| target.clone())
            .collect()
    }

    fn attach_dir(target: &Path, fixture: &Path) -> zenfs_sys::Result<()> {
        if fs::symlink_metadata(target).is_ok() {
            fs::remove_dir(target)?;
        }
        symlink(fixture, target)?;
        Ok(())
    }
}

impl Mounter for FakeMounter {
    fn mounts_of(&self, device: &Path) -> zenfs_sys::Result<Vec<PathBuf>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mounts
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, target)| target.clone())
            .collect())
    }

    fn is_mounted(&self, target: &Path) -> zenfs_sys::Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mounts
            .iter()
            .any(|(_, t)| t == target))
    }

    fn mount(&self, device: &Path, target: &Path) -> zenfs_sys::Result<()> {
        let fixture = self
            .devices
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .ok_or_else(|| SysError::DeviceNotFound(device.display().to_string()))?;
        Self::attach_dir(target, &fixture)?;
        self.state
            .lock()
            .unwrap()
            .mounts
            .push((device.to_path_buf(), target.to_path_buf()));
        Ok(())
    }

    fn bind(&self, source: &Path, target: &Path) -> zenfs_sys::Result<()> {
        if self.refuse_binds.load(Ordering::SeqCst) {
            return Err(SysError::OperationFailed(format!("bind onto {target:?} refused")));
        }
        let mut state = self.state.lock().unwrap();
        let device = state
            .mounts
            .iter()
            .find(|(_, t)| t == source)
            .map(|(d, _)| d.clone())
            .ok_or_else(|| SysError::OperationFailed(format!("{source:?} is not mounted")))?;
        let fixture = fs::read_link(source)?;
        Self::attach_dir(target, &fixture)?;
        state.mounts.push((device, target.to_path_buf()));
        state.binds += 1;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> zenfs_sys::Result<()> {
        let mut state = self.state.lock().unwrap();
        let position = state
            .mounts
            .iter()
            .rposition(|(_, t)| t == target)
            .ok_or_else(|| SysError::OperationFailed(format!("{target:?} is not mounted")))?;
        state.mounts.remove(position);
        fs::remove_file(target)?;
        fs::create_dir(target)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn bodies(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, summary: &str, body: &str) -> zenfs_sys::Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((summary.to_string(), body.to_string()));
        Ok(())
    }
}

/// Usage readings: a queue for the primary home, fixed values elsewhere
#[derive(Default)]
pub struct FakeUsage {
    home: Mutex<VecDeque<f64>>,
    fixed: Mutex<HashMap<PathBuf, f64>>,
}

impl FakeUsage {
    /// The last home reading repeats once the queue runs dry.
    pub fn home_readings(&self, readings: &[f64]) {
        *self.home.lock().unwrap() = readings.iter().copied().collect();
    }

    pub fn set(&self, path: &Path, percent: f64) {
        self.fixed
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), percent);
    }

    fn home_reading(&self) -> f64 {
        let mut home = self.home.lock().unwrap();
        if home.len() > 1 {
            home.pop_front().unwrap_or(0.0)
        } else {
            home.front().copied().unwrap_or(0.0)
        }
    }
}

impl UsageSource for FakeUsage {
    fn usage_percent(&self, path: &Path) -> zenfs_sys::Result<f64> {
        if let Some(percent) = self.fixed.lock().unwrap().get(path) {
            return Ok(*percent);
        }
        if path.ends_with("home") {
            return Ok(self.home_reading());
        }
        Err(SysError::OperationFailed(format!("no usage for {path:?}")))
    }
}

/// Every file below `root` with its contents, sorted by path.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, String)> {
    let mut files: Vec<(PathBuf, String)> = zenfs_sys::TreeWalk::new(root)
        .filter(|entry| entry.is_file())
        .map(|entry| {
            let content = fs::read_to_string(&entry.path).unwrap();
            (entry.path.strip_prefix(root).unwrap().to_path_buf(), content)
        })
        .collect();
    files.sort();
    files
}
