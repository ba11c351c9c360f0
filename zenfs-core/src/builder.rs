// SPDX-License-Identifier: GPL-3.0-only

//! Full rescan of one drive's ghost index

use crate::error::Result;
use crate::ghost::{GhostKind, write_ghost};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use zenfs_sys::{EntryKind, TreeWalk};
use zenfs_types::{DrivePaths, IgnoreRules};

/// Summary of a rebuild
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub users: usize,
    pub entries: usize,
    pub skipped: u64,
}

/// Replace the drive's index with one ghost per non-ignored entry under `Users/`.
///
/// A drive without a `Users` directory ends up with an empty index.
pub fn rebuild(drive_root: &Path, uuid: &str, rules: &IgnoreRules) -> Result<RebuildStats> {
    let drive = DrivePaths::new(drive_root);
    let db_root = drive.database();
    info!("Rebuilding index for {} at {:?}", uuid, drive_root);

    if db_root.exists() {
        fs::remove_dir_all(&db_root)?;
    }
    fs::create_dir_all(&db_root)?;

    let users_root = drive.users();
    if !users_root.is_dir() {
        info!("No Users directory on {:?}, skipping index build", drive_root);
        return Ok(RebuildStats::default());
    }

    let mut stats = RebuildStats::default();
    for entry in fs::read_dir(&users_root)?.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Ok(user) = entry.file_name().into_string() else {
            warn!("Skipping non UTF-8 user directory {:?}", entry.path());
            continue;
        };

        let user_root = entry.path();
        fs::create_dir_all(db_root.join(&user))?;
        stats.users += 1;

        let filter_rules = rules.clone();
        let filter_root = user_root.clone();
        let mut walk = TreeWalk::new(&user_root)
            .filter_entry(move |e| !filter_rules.is_ignored(&e.path, &filter_root));

        for walked in walk.by_ref() {
            let kind = match walked.kind {
                EntryKind::Dir => GhostKind::Directory,
                EntryKind::File | EntryKind::Symlink => GhostKind::File,
                EntryKind::Other => continue,
            };
            let Ok(rel) = walked.path.strip_prefix(&user_root) else {
                continue;
            };
            write_ghost(&drive.ghost_entry(&user, rel), uuid, kind)?;
            debug!("Indexed {}/{:?}", user, rel);
            stats.entries += 1;
        }
        stats.skipped += walk.skipped_errors();
    }

    info!(
        "Index for {} complete: {} entries across {} users",
        uuid, stats.entries, stats.users
    );
    Ok(stats)
}
