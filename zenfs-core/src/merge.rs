// SPDX-License-Identifier: GPL-3.0-only

//! Folding drive-local indexes into the system index
//!
//! Merge only adds and overwrites. Entries of drives that are no longer bound
//! stay in the system index so their paths keep resolving to placeholders.
//! When two drives claim the same path the drive merged last wins; drives are
//! visited in directory order.

use crate::context::ZenfsContext;
use crate::error::Result;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use zenfs_sys::TreeWalk;
use zenfs_types::DrivePaths;

/// Overlay every bound drive's index onto the system index.
///
/// Returns the number of files written.
pub fn merge(ctx: &ZenfsContext) -> Result<usize> {
    let _lock = ctx.lock_index()?;
    fs::create_dir_all(&ctx.layout.database)?;

    let mut written = 0;
    for uuid in ctx.bound_drives() {
        let drive_db = DrivePaths::new(ctx.layout.roaming_mount(&uuid)).database();
        if !drive_db.is_dir() {
            debug!("Drive {} has no index", uuid);
            continue;
        }
        match overlay(&drive_db, &ctx.layout.database) {
            Ok(count) => {
                debug!("Merged {} files from {}", count, uuid);
                written += count;
            }
            Err(e) => warn!("Failed to merge index of {}: {}", uuid, e),
        }
    }

    info!("System index merge complete ({} files)", written);
    Ok(written)
}

/// Copy the tree at `source` over `target`, replacing entries of another kind.
pub fn overlay(source: &Path, target: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in TreeWalk::new(source) {
        let Ok(rel) = entry.path.strip_prefix(source) else {
            continue;
        };
        let destination = target.join(rel);
        let existing = fs::symlink_metadata(&destination).ok();

        if entry.is_dir() {
            if existing.as_ref().is_some_and(|m| !m.is_dir()) {
                fs::remove_file(&destination)?;
            }
            fs::create_dir_all(&destination)?;
        } else if entry.is_file() {
            if existing.as_ref().is_some_and(|m| m.is_dir()) {
                fs::remove_dir_all(&destination)?;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&entry.path, &destination)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ghost::{GhostKind, write_ghost};

    #[test]
    fn overlay_overwrites_and_keeps_extra_entries() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("src");
        let target = temp.path().join("dst");

        write_ghost(&source.join("alice/a.txt"), "Ab3dEf7hIj9kLm0p", GhostKind::File).unwrap();
        write_ghost(&target.join("alice/a.txt"), "Zx9Yw8Vu7Ts6Rq5P", GhostKind::File).unwrap();
        write_ghost(&target.join("alice/old.txt"), "Zx9Yw8Vu7Ts6Rq5P", GhostKind::File).unwrap();

        assert_eq!(overlay(&source, &target).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(target.join("alice/a.txt")).unwrap(),
            "Ab3dEf7hIj9kLm0p"
        );
        assert!(target.join("alice/old.txt").exists());
    }

    #[test]
    fn overlay_replaces_kind_mismatch() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("src");
        let target = temp.path().join("dst");

        write_ghost(&source.join("alice/x"), "Ab3dEf7hIj9kLm0p", GhostKind::Directory).unwrap();
        write_ghost(&target.join("alice/x"), "Ab3dEf7hIj9kLm0p", GhostKind::File).unwrap();

        overlay(&source, &target).unwrap();
        assert!(target.join("alice/x").is_dir());
    }
}
