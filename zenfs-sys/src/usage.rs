// SPDX-License-Identifier: GPL-3.0-only

use crate::error::{Result, SysError};
use nix::sys::statvfs::statvfs;
use std::path::Path;

/// Filesystem usage for the filesystem containing a path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    /// Used share of the total (0-100)
    pub percent: f64,
}

/// Source of usage percentages, substitutable for tests
pub trait UsageSource: Send + Sync {
    fn usage_percent(&self, path: &Path) -> Result<f64>;
}

/// Reads usage from the kernel with `statvfs(3)`
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsUsage;

impl UsageSource for StatvfsUsage {
    fn usage_percent(&self, path: &Path) -> Result<f64> {
        usage_for_path(path).map(|usage| usage.percent)
    }
}

pub fn usage_for_path(path: &Path) -> Result<DiskUsage> {
    let stats = statvfs(path).map_err(|source| SysError::Usage {
        path: path.to_path_buf(),
        source,
    })?;

    let frsize = if stats.fragment_size() > 0 {
        stats.fragment_size() as u64
    } else {
        stats.block_size() as u64
    };

    let total = (stats.blocks() as u64).saturating_mul(frsize);
    let free = (stats.blocks_free() as u64).saturating_mul(frsize);
    let available = (stats.blocks_available() as u64).saturating_mul(frsize);
    let used = total.saturating_sub(free);
    let percent = if total == 0 {
        0.0
    } else {
        (used as f64 * 100.0) / total as f64
    };

    Ok(DiskUsage {
        total,
        used,
        available,
        percent,
    })
}
