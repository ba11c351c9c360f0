// SPDX-License-Identifier: GPL-3.0-only

//! Capacity-driven relocation of large local files to roaming drives

use crate::context::ZenfsContext;
use crate::error::Result;
use crate::ghost::{GhostKind, write_ghost};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use zenfs_sys::{TreeWalk, UsageSource};
use zenfs_types::{DrivePaths, IgnoreRules, Layout, NEAR_FULL_CEILING, OffloadConfig};

/// A local file eligible for relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub user: String,
    /// Path relative to the user's home
    pub rel: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadOutcome {
    /// Usage was under the threshold to begin with
    BelowThreshold,
    /// Usage dropped under the threshold during the pass
    TargetReached,
    /// No bound drive could take more data
    Saturated,
    /// Every candidate was tried
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffloadReport {
    pub outcome: OffloadOutcome,
    pub moved: usize,
    pub bytes: u64,
    pub failed: usize,
}

/// Pick the target drive from `(uuid, usage)` pairs.
///
/// The least used drive under `safe_limit` wins; failing that, the least used
/// drive under `ceiling`.
pub fn select_target(drives: &[(String, f64)], safe_limit: f64, ceiling: f64) -> Option<&str> {
    let least_used_below = |limit: f64| {
        drives
            .iter()
            .filter(|(_, usage)| *usage < limit)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(uuid, _)| uuid.as_str())
    };
    least_used_below(safe_limit).or_else(|| least_used_below(ceiling))
}

/// Real files under `<primary_home>/<user>` larger than `min_size`, largest first.
pub fn collect_candidates(layout: &Layout, rules: &IgnoreRules, min_size: u64) -> Vec<Candidate> {
    let home = layout.primary_home.clone();
    let filter_home = home.clone();
    let filter_rules = rules.clone();

    let walk = TreeWalk::new(&home).filter_entry(move |entry| {
        if entry.depth < 2 {
            return true;
        }
        match user_root(&filter_home, &entry.path) {
            Some(root) => !filter_rules.is_ignored(&entry.path, &root),
            None => true,
        }
    });

    let mut candidates: Vec<Candidate> = walk
        .filter(|entry| entry.is_file() && entry.depth >= 2 && entry.size > min_size)
        .filter_map(|entry| {
            let rel_to_home = entry.path.strip_prefix(&home).ok()?;
            let mut components = rel_to_home.components();
            let user = components.next()?.as_os_str().to_str()?.to_string();
            let rel = components.as_path().to_path_buf();
            Some(Candidate {
                user,
                rel,
                size: entry.size,
                path: entry.path,
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.size.cmp(&a.size));
    candidates
}

fn user_root(home: &Path, path: &Path) -> Option<PathBuf> {
    let first = path.strip_prefix(home).ok()?.components().next()?;
    Some(home.join(first))
}

/// Copy `candidate` onto drive `uuid`, index it, then delete the original.
pub fn move_file(ctx: &ZenfsContext, candidate: &Candidate, uuid: &str) -> Result<()> {
    let drive = DrivePaths::new(ctx.layout.roaming_mount(uuid));
    let target = drive.user_file(&candidate.user, &candidate.rel);
    let _lock = ctx.lock_index()?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&candidate.path, &target)?;
    let modified = fs::metadata(&candidate.path)?.modified()?;
    OpenOptions::new()
        .write(true)
        .open(&target)?
        .set_modified(modified)?;

    write_ghost(
        &drive.ghost_entry(&candidate.user, &candidate.rel),
        uuid,
        GhostKind::File,
    )?;
    write_ghost(
        &ctx.layout.system_entry(&candidate.user, &candidate.rel),
        uuid,
        GhostKind::File,
    )?;

    fs::remove_file(&candidate.path)?;
    Ok(())
}

pub struct OffloadMover<'a> {
    ctx: &'a ZenfsContext,
    source: &'a dyn UsageSource,
    config: OffloadConfig,
}

impl<'a> OffloadMover<'a> {
    pub fn new(ctx: &'a ZenfsContext, source: &'a dyn UsageSource, config: OffloadConfig) -> Self {
        Self { ctx, source, config }
    }

    /// Unreadable usage counts as full.
    fn usage(&self, path: &Path) -> f64 {
        self.source.usage_percent(path).unwrap_or_else(|e| {
            warn!("Cannot read usage of {:?}: {}", path, e);
            100.0
        })
    }

    fn drive_usage(&self) -> Vec<(String, f64)> {
        self.ctx
            .bound_drives()
            .into_iter()
            .map(|uuid| {
                let usage = self.usage(&self.ctx.layout.roaming_mount(&uuid));
                (uuid, usage)
            })
            .collect()
    }

    /// One offload pass.
    pub fn run(&self) -> OffloadReport {
        let home = &self.ctx.layout.primary_home;
        let threshold = self.config.offload_threshold;
        let mut report = OffloadReport {
            outcome: OffloadOutcome::Exhausted,
            moved: 0,
            bytes: 0,
            failed: 0,
        };

        let usage = self.usage(home);
        if usage < threshold {
            info!("Primary usage {:.1}% below {}%, nothing to do", usage, threshold);
            report.outcome = OffloadOutcome::BelowThreshold;
            return report;
        }
        warn!("Primary usage {:.1}% over {}%, starting offload", usage, threshold);

        let candidates =
            collect_candidates(&self.ctx.layout, &self.ctx.rules, self.config.min_file_size);
        debug!("{} offload candidates", candidates.len());

        for candidate in &candidates {
            if self.usage(home) < threshold {
                info!("Primary usage back under {}%", threshold);
                report.outcome = OffloadOutcome::TargetReached;
                return report;
            }

            let drives = self.drive_usage();
            let Some(uuid) =
                select_target(&drives, self.config.roaming_safe_limit, NEAR_FULL_CEILING)
            else {
                error!("CRITICAL: no roaming drive can accept more data, primary stays full");
                report.outcome = OffloadOutcome::Saturated;
                return report;
            };

            info!("Offloading {:?} ({} bytes) to {}", candidate.path, candidate.size, uuid);
            match move_file(self.ctx, candidate, uuid) {
                Ok(()) => {
                    report.moved += 1;
                    report.bytes += candidate.size;
                }
                Err(e) => {
                    error!("Failed to offload {:?}: {}", candidate.path, e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
