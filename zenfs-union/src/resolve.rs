// SPDX-License-Identifier: GPL-3.0-only

//! Virtual path resolution
//!
//! A virtual path is relative to the mount point. In mirror mode it always
//! maps into the source directory. In union mode a local copy wins; otherwise
//! the drive named by the reverse index is tried, then every bound drive's
//! `Users/<path>` in UUID order.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use tracing::trace;
use zenfs_core::{SharedReverseIndex, ZenfsContext};
use zenfs_types::DrivePaths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Local(PathBuf),
    Roaming { uuid: String, path: PathBuf },
    /// Not found anywhere; the path a new entry would get locally
    Missing(PathBuf),
}

impl Resolved {
    pub fn path(&self) -> &Path {
        match self {
            Resolved::Local(path) | Resolved::Missing(path) => path,
            Resolved::Roaming { path, .. } => path,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, Resolved::Missing(_))
    }
}

pub struct UnionResolver {
    source: PathBuf,
    ctx: ZenfsContext,
    union: bool,
    reverse: Option<SharedReverseIndex>,
}

impl UnionResolver {
    /// Plain passthrough of `source`
    pub fn mirror(source: impl Into<PathBuf>, ctx: ZenfsContext) -> Self {
        Self {
            source: source.into(),
            ctx,
            union: false,
            reverse: None,
        }
    }

    /// Local `source` unioned with every bound roaming drive
    pub fn union(
        source: impl Into<PathBuf>,
        ctx: ZenfsContext,
        reverse: Option<SharedReverseIndex>,
    ) -> Self {
        Self {
            source: source.into(),
            ctx,
            union: true,
            reverse,
        }
    }

    pub fn is_union(&self) -> bool {
        self.union
    }

    fn drive_path(&self, uuid: &str, rel: &Path) -> PathBuf {
        let users = DrivePaths::new(self.ctx.layout.roaming_mount(uuid)).users();
        if rel.as_os_str().is_empty() {
            users
        } else {
            users.join(rel)
        }
    }

    fn sorted_drives(&self) -> Vec<String> {
        let mut drives = self.ctx.bound_drives();
        drives.sort();
        drives
    }

    pub fn resolve(&self, rel: &Path) -> Resolved {
        let local = self.source.join(rel);
        if !self.union || fs::symlink_metadata(&local).is_ok() {
            return Resolved::Local(local);
        }

        let indexed = self
            .reverse
            .as_ref()
            .and_then(|reverse| {
                reverse
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .owner_of(rel)
                    .map(str::to_string)
            });
        if let Some(uuid) = indexed {
            let path = self.drive_path(&uuid, rel);
            if fs::symlink_metadata(&path).is_ok() {
                trace!("{:?} resolved through index to {}", rel, uuid);
                return Resolved::Roaming { uuid, path };
            }
        }

        for uuid in self.sorted_drives() {
            let path = self.drive_path(&uuid, rel);
            if fs::symlink_metadata(&path).is_ok() {
                trace!("{:?} resolved by scan to {}", rel, uuid);
                return Resolved::Roaming { uuid, path };
            }
        }

        Resolved::Missing(local)
    }

    /// Where a new entry named `name` inside virtual directory `parent` goes.
    pub fn creation_path(&self, parent: &Path, name: &std::ffi::OsStr) -> PathBuf {
        match self.resolve(parent) {
            Resolved::Missing(local) => local.join(name),
            resolved => resolved.path().join(name),
        }
    }

    /// Deduplicated listing of a virtual directory; local entries shadow
    /// drive entries of the same name.
    pub fn list(&self, rel: &Path) -> Vec<(OsString, PathBuf)> {
        let mut seen = HashSet::new();
        let mut listing = Vec::new();

        let mut dirs = vec![self.source.join(rel)];
        if self.union {
            dirs.extend(
                self.sorted_drives()
                    .iter()
                    .map(|uuid| self.drive_path(uuid, rel)),
            );
        }

        for dir in dirs {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                if seen.insert(name.clone()) {
                    listing.push((name, entry.path()));
                }
            }
        }
        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zenfs_core::identity;
    use zenfs_core::{ReverseIndex, ZenfsContext};
    use zenfs_types::{DriveRecord, DriveType, IgnoreRules, Layout};

    const A: &str = "Ab3dEf7hIj9kLm0p";
    const B: &str = "Zx9Yw8Vu7Ts6Rq5P";

    fn setup() -> (tempfile::TempDir, ZenfsContext, PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(temp.path());
        let ctx = ZenfsContext::new(layout, IgnoreRules::default(), "system");
        for uuid in [A, B] {
            let record = DriveRecord {
                uuid: uuid.to_string(),
                label: String::new(),
                drive_type: DriveType::Roaming,
                created_at: 0,
            };
            identity::write(&ctx.layout.roaming_mount(uuid), &record).unwrap();
        }
        let source = temp.path().join("home");
        fs::create_dir_all(source.join("alice")).unwrap();
        (temp, ctx, source)
    }

    fn put(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn local_copy_wins() {
        let (_temp, ctx, source) = setup();
        put(&source.join("alice/doc.txt"));
        put(&ctx.layout.roaming_mount(A).join("Users/alice/doc.txt"));

        let resolver = UnionResolver::union(&source, ctx, None);
        assert_eq!(
            resolver.resolve(Path::new("alice/doc.txt")),
            Resolved::Local(source.join("alice/doc.txt"))
        );
    }

    #[test]
    fn falls_back_to_bound_drives() {
        let (_temp, ctx, source) = setup();
        let remote = ctx.layout.roaming_mount(B).join("Users/alice/song.flac");
        put(&remote);

        let resolver = UnionResolver::union(&source, ctx, None);
        assert_eq!(
            resolver.resolve(Path::new("alice/song.flac")),
            Resolved::Roaming {
                uuid: B.to_string(),
                path: remote
            }
        );
        assert!(!resolver.resolve(Path::new("alice/nothing")).exists());
    }

    #[test]
    fn reverse_index_picks_owner_first() {
        let (_temp, ctx, source) = setup();
        put(&ctx.layout.roaming_mount(A).join("Users/alice/dup.txt"));
        put(&ctx.layout.roaming_mount(B).join("Users/alice/dup.txt"));

        let mut index = ReverseIndex::new();
        index.insert("alice", Path::new("dup.txt"), B);
        let resolver = UnionResolver::union(&source, ctx, Some(index.shared()));
        match resolver.resolve(Path::new("alice/dup.txt")) {
            Resolved::Roaming { uuid, .. } => assert_eq!(uuid, B),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn listing_is_deduplicated_union() {
        let (_temp, ctx, source) = setup();
        put(&source.join("alice/a.txt"));
        put(&ctx.layout.roaming_mount(A).join("Users/alice/a.txt"));
        put(&ctx.layout.roaming_mount(A).join("Users/alice/b.txt"));
        put(&ctx.layout.roaming_mount(B).join("Users/alice/c.txt"));

        let resolver = UnionResolver::union(&source, ctx, None);
        let mut names: Vec<OsString> = resolver
            .list(Path::new("alice"))
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn mirror_never_consults_drives() {
        let (_temp, ctx, source) = setup();
        put(&ctx.layout.roaming_mount(A).join("Users/alice/remote.txt"));

        let resolver = UnionResolver::mirror(&source, ctx);
        assert_eq!(
            resolver.resolve(Path::new("alice/remote.txt")),
            Resolved::Local(source.join("alice/remote.txt"))
        );
        assert!(resolver.list(Path::new("alice")).is_empty());
    }
}
