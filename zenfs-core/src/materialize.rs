// SPDX-License-Identifier: GPL-3.0-only

//! Symlink view of the system index
//!
//! Each remote ghost becomes a symlink in the user's real home, pointing at
//! the live file on its bound drive or at a placeholder under the missing
//! drives root. A ghost is linked at the shallowest level with nothing real in
//! the way; a real directory standing where a directory ghost lives is
//! descended into instead.
//!
//! Only links that point into the roaming root or the missing drives root are
//! ever created, replaced or removed.

use crate::context::ZenfsContext;
use crate::error::Result;
use crate::ghost::{GhostKind, read_ghost, user_dirs};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zenfs_sys::{EntryKind, TreeWalk, mountinfo};
use zenfs_types::{DrivePaths, FOLDER_MARKER, Layout, is_local_owner};

const MISSING_README: &str = "README_INSERT_DRIVE.txt";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Whether the home namespace is served by the union filesystem.
pub fn union_mode_active(layout: &Layout) -> bool {
    match mountinfo::read_mount_table() {
        Ok(table) => mountinfo::entry_at(&table, &layout.users_mount).is_some_and(|e| e.is_fuse()),
        Err(e) => {
            warn!("Cannot read mount table, assuming symlink mode: {}", e);
            false
        }
    }
}

/// Bring the symlink view in line with the system index, unless the union
/// filesystem already serves it.
pub fn materialize(ctx: &ZenfsContext) -> Result<Option<LinkStats>> {
    if union_mode_active(&ctx.layout) {
        info!(
            "Union filesystem mounted at {:?}, skipping symlink view",
            ctx.layout.users_mount
        );
        return Ok(None);
    }
    sync_links(ctx).map(Some)
}

/// Both phases of the symlink pass, holding the index lock.
pub fn sync_links(ctx: &ZenfsContext) -> Result<LinkStats> {
    let _lock = ctx.lock_index()?;
    let bound: HashSet<String> = ctx.bound_drives().into_iter().collect();
    let mut pass = LinkPass {
        ctx,
        bound,
        stats: LinkStats::default(),
    };

    for (user, db_user_root) in user_dirs(&ctx.layout.database) {
        let home = ctx.layout.real_home(&user);
        if !home.is_dir() {
            debug!("No real home for {}, skipping", user);
            continue;
        }
        pass.link_user(&user, &db_user_root, &home);
        pass.prune_user(&user, &home);
    }

    info!(
        "Symlink view synced: {} created, {} updated, {} removed",
        pass.stats.created, pass.stats.updated, pass.stats.removed
    );
    Ok(pass.stats)
}

struct LinkPass<'a> {
    ctx: &'a ZenfsContext,
    bound: HashSet<String>,
    stats: LinkStats,
}

impl LinkPass<'_> {
    fn link_user(&mut self, user: &str, db_user_root: &Path, home: &Path) {
        let mut pending = vec![PathBuf::new()];

        while let Some(dir_rel) = pending.pop() {
            let Ok(children) = fs::read_dir(db_user_root.join(&dir_rel)) else {
                continue;
            };

            for child in children.flatten() {
                if child.file_name() == FOLDER_MARKER {
                    continue;
                }
                let rel = dir_rel.join(child.file_name());
                let link = home.join(&rel);
                let in_the_way = fs::symlink_metadata(&link).ok();
                let real_dir = in_the_way.as_ref().is_some_and(|m| m.is_dir());
                let real_entry = in_the_way.as_ref().is_some_and(|m| !m.file_type().is_symlink());

                let Some(ghost) = read_ghost(&child.path()) else {
                    // Structure-only directory: descend, creating it in the home if absent
                    if child.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                        if in_the_way.is_none() {
                            if let Err(e) = fs::create_dir_all(&link) {
                                warn!("Failed to create {:?}: {}", link, e);
                                continue;
                            }
                        } else if !real_dir {
                            continue;
                        }
                        pending.push(rel);
                    }
                    continue;
                };

                if is_local_owner(&ghost.owner, &self.ctx.machine_id) {
                    if !real_entry {
                        self.remove_redirect(&link);
                    }
                    if real_dir && ghost.kind == GhostKind::Directory {
                        pending.push(rel);
                    }
                    continue;
                }

                if real_entry {
                    if real_dir && ghost.kind == GhostKind::Directory {
                        pending.push(rel);
                    }
                    continue;
                }

                let target = match self.target_for(&ghost.owner, ghost.kind, user, &rel) {
                    Ok(target) => target,
                    Err(e) => {
                        warn!("Failed to prepare target for {}/{:?}: {}", user, rel, e);
                        continue;
                    }
                };
                self.point(&link, &target);
            }
        }
    }

    /// Remove redirect links whose index entry is gone.
    fn prune_user(&mut self, user: &str, home: &Path) {
        let links = TreeWalk::new(home).filter(|e| e.kind == EntryKind::Symlink);
        for entry in links {
            let Ok(target) = fs::read_link(&entry.path) else {
                continue;
            };
            if !self.is_redirect(&target) {
                continue;
            }
            let Ok(rel) = entry.path.strip_prefix(home) else {
                continue;
            };
            let indexed = self.ctx.layout.system_entry(user, rel);
            if fs::symlink_metadata(&indexed).is_err() {
                debug!("Removing dead link {:?}", entry.path);
                match fs::remove_file(&entry.path) {
                    Ok(()) => self.stats.removed += 1,
                    Err(e) => warn!("Failed to remove {:?}: {}", entry.path, e),
                }
            }
        }
    }

    fn target_for(&self, owner: &str, kind: GhostKind, user: &str, rel: &Path) -> Result<PathBuf> {
        if self.bound.contains(owner) {
            Ok(DrivePaths::new(self.ctx.layout.roaming_mount(owner)).user_file(user, rel))
        } else {
            ensure_placeholder(&self.ctx.layout, owner, user, rel, kind)
        }
    }

    fn point(&mut self, link: &Path, target: &Path) {
        let existing = fs::read_link(link).ok();
        if existing.as_deref() == Some(target) {
            return;
        }
        if let Some(current) = &existing {
            if !self.is_redirect(current) {
                return;
            }
            if let Err(e) = fs::remove_file(link) {
                warn!("Failed to replace {:?}: {}", link, e);
                return;
            }
        }
        if let Some(parent) = link.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create {:?}: {}", parent, e);
                return;
            }
        }

        match symlink(target, link) {
            Ok(()) => {
                debug!("Linked {:?} -> {:?}", link, target);
                if existing.is_some() {
                    self.stats.updated += 1;
                } else {
                    self.stats.created += 1;
                }
            }
            Err(e) => warn!("Failed to link {:?}: {}", link, e),
        }
    }

    fn remove_redirect(&mut self, link: &Path) {
        let Ok(target) = fs::read_link(link) else {
            return;
        };
        if self.is_redirect(&target) && fs::remove_file(link).is_ok() {
            self.stats.removed += 1;
        }
    }

    fn is_redirect(&self, target: &Path) -> bool {
        target.starts_with(&self.ctx.layout.roaming_root)
            || target.starts_with(&self.ctx.layout.missing_root)
    }
}

/// Placeholder standing in for an entry on a drive that is not bound.
pub fn ensure_placeholder(
    layout: &Layout,
    uuid: &str,
    user: &str,
    rel: &Path,
    kind: GhostKind,
) -> Result<PathBuf> {
    let placeholder = layout.missing_placeholder(uuid, user, rel);
    if fs::symlink_metadata(&placeholder).is_ok() {
        return Ok(placeholder);
    }

    match kind {
        GhostKind::Directory => {
            fs::create_dir_all(&placeholder)?;
            fs::write(
                placeholder.join(MISSING_README),
                format!("Drive {uuid} missing."),
            )?;
        }
        GhostKind::File => {
            if let Some(parent) = placeholder.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(
                &placeholder,
                format!("File unavailable. Connect drive {uuid}."),
            )?;
        }
    }
    Ok(placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ghost::write_ghost;
    use crate::identity;
    use zenfs_types::{DriveRecord, DriveType, IgnoreRules};

    const UUID: &str = "Ab3dEf7hIj9kLm0p";

    fn context(root: &Path) -> ZenfsContext {
        ZenfsContext::new(Layout::rooted_at(root), IgnoreRules::default(), "Mach1neId00000000")
    }

    fn bind(ctx: &ZenfsContext, uuid: &str) {
        let record = DriveRecord {
            uuid: uuid.to_string(),
            label: "Test".into(),
            drive_type: DriveType::Roaming,
            created_at: 0,
        };
        identity::write(&ctx.layout.roaming_mount(uuid), &record).unwrap();
    }

    #[test]
    fn links_follow_drive_presence() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        fs::create_dir_all(ctx.layout.real_home("alice")).unwrap();
        write_ghost(
            &ctx.layout.system_entry("alice", Path::new("song.flac")),
            UUID,
            GhostKind::File,
        )
        .unwrap();

        bind(&ctx, UUID);
        let stats = sync_links(&ctx).unwrap();
        assert_eq!(stats.created, 1);
        let link = ctx.layout.real_home("alice").join("song.flac");
        assert_eq!(
            fs::read_link(&link).unwrap(),
            ctx.layout.roaming_mount(UUID).join("Users/alice/song.flac")
        );

        fs::remove_dir_all(ctx.layout.roaming_mount(UUID)).unwrap();
        let stats = sync_links(&ctx).unwrap();
        assert_eq!(stats.updated, 1);
        let placeholder = fs::read_link(&link).unwrap();
        assert!(placeholder.starts_with(&ctx.layout.missing_root));
        assert_eq!(
            fs::read_to_string(placeholder).unwrap(),
            format!("File unavailable. Connect drive {UUID}.")
        );
    }

    #[test]
    fn real_directories_are_descended_and_real_files_kept() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let home = ctx.layout.real_home("alice");
        fs::create_dir_all(home.join("Music")).unwrap();
        fs::write(home.join("keep.txt"), b"mine").unwrap();

        let entry = |rel: &str| ctx.layout.system_entry("alice", Path::new(rel));
        write_ghost(&entry("Music"), UUID, GhostKind::Directory).unwrap();
        write_ghost(&entry("Music/a.flac"), UUID, GhostKind::File).unwrap();
        write_ghost(&entry("keep.txt"), UUID, GhostKind::File).unwrap();

        sync_links(&ctx).unwrap();
        assert!(fs::symlink_metadata(home.join("Music")).unwrap().is_dir());
        assert!(fs::symlink_metadata(home.join("Music/a.flac")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(home.join("keep.txt")).unwrap(), b"mine");
    }

    #[test]
    fn dead_and_local_links_are_removed() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let home = ctx.layout.real_home("alice");
        fs::create_dir_all(&home).unwrap();

        let stale_target = ctx.layout.roaming_mount(UUID).join("Users/alice/gone");
        symlink(&stale_target, home.join("gone")).unwrap();
        symlink(&stale_target, home.join("local")).unwrap();
        symlink("/etc/hostname", home.join("mine")).unwrap();
        let local = ctx.layout.system_entry("alice", Path::new("local"));
        write_ghost(&local, "system", GhostKind::File).unwrap();

        let stats = sync_links(&ctx).unwrap();
        assert_eq!(stats.removed, 2);
        assert!(fs::symlink_metadata(home.join("gone")).is_err());
        assert!(fs::symlink_metadata(home.join("local")).is_err());
        assert!(fs::symlink_metadata(home.join("mine")).is_ok());
    }

    #[test]
    fn directory_placeholder_has_readme() {
        let temp = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(temp.path());
        let path =
            ensure_placeholder(&layout, UUID, "bob", Path::new("Photos"), GhostKind::Directory)
                .unwrap();
        assert_eq!(
            fs::read_to_string(path.join(MISSING_README)).unwrap(),
            format!("Drive {UUID} missing.")
        );
    }
}
