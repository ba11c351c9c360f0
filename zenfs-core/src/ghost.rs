// SPDX-License-Identifier: GPL-3.0-only

//! Ghost entries
//!
//! A ghost file's content is the owning drive's UUID. A ghost directory is a
//! real directory holding a `.zenfs-folder` marker with the same content, and
//! may contain further ghost entries for the files below it. Directories
//! without a marker only give structure to deeper entries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zenfs_sys::TreeWalk;
use zenfs_types::FOLDER_MARKER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GhostKind {
    File,
    Directory,
}

impl GhostKind {
    pub fn of(is_dir: bool) -> Self {
        if is_dir {
            GhostKind::Directory
        } else {
            GhostKind::File
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostEntry {
    pub owner: String,
    pub kind: GhostKind,
}

/// A ghost entry located inside an index root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub user: String,
    /// Path relative to the user's root
    pub rel: PathBuf,
    pub entry: GhostEntry,
}

/// Create or update the ghost at `path`, replacing an entry of the other kind.
pub fn write_ghost(path: &Path, owner: &str, kind: GhostKind) -> io::Result<()> {
    let existing = fs::symlink_metadata(path).ok();

    match kind {
        GhostKind::File => {
            if existing.as_ref().is_some_and(|m| m.is_dir()) {
                fs::remove_dir_all(path)?;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, owner)
        }
        GhostKind::Directory => {
            if existing.as_ref().is_some_and(|m| !m.is_dir()) {
                fs::remove_file(path)?;
            }
            fs::create_dir_all(path)?;
            fs::write(path.join(FOLDER_MARKER), owner)
        }
    }
}

pub fn read_ghost(path: &Path) -> Option<GhostEntry> {
    let metadata = fs::symlink_metadata(path).ok()?;
    let (content, kind) = if metadata.is_dir() {
        (
            fs::read_to_string(path.join(FOLDER_MARKER)).ok()?,
            GhostKind::Directory,
        )
    } else if metadata.is_file() {
        (fs::read_to_string(path).ok()?, GhostKind::File)
    } else {
        return None;
    };

    let owner = content.trim();
    if owner.is_empty() {
        return None;
    }
    Some(GhostEntry {
        owner: owner.to_string(),
        kind,
    })
}

/// Remove the ghost at `path` and everything below it.
///
/// Returns `false` when there was nothing to remove.
pub fn remove_ghost(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

/// Every ghost entry below `db_root`, organized as `<db_root>/<user>/<rel>`.
pub fn entries(db_root: &Path) -> impl Iterator<Item = IndexedEntry> + use<> {
    user_dirs(db_root).into_iter().flat_map(|(user, user_root)| {
        TreeWalk::new(user_root.clone())
            .filter_entry(|entry| !entry.path.ends_with(FOLDER_MARKER))
            .filter_map(move |walked| {
                let entry = read_ghost(&walked.path)?;
                let rel = walked.path.strip_prefix(&user_root).ok()?.to_path_buf();
                Some(IndexedEntry {
                    user: user.clone(),
                    rel,
                    entry,
                })
            })
    })
}

/// `(user, directory)` pairs directly under an index root, sorted by name.
pub fn user_dirs(db_root: &Path) -> Vec<(String, PathBuf)> {
    let Ok(read_dir) = fs::read_dir(db_root) else {
        return Vec::new();
    };

    let mut users: Vec<(String, PathBuf)> = read_dir
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            Some((name, entry.path()))
        })
        .collect();
    users.sort();
    users
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "Ab3dEf7hIj9kLm0p";

    #[test]
    fn file_and_directory_ghosts_carry_owner() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("alice/notes.txt");
        let dir = temp.path().join("alice/Music");

        write_ghost(&file, UUID, GhostKind::File).unwrap();
        write_ghost(&dir, UUID, GhostKind::Directory).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), UUID);
        assert_eq!(fs::read_to_string(dir.join(FOLDER_MARKER)).unwrap(), UUID);
        assert_eq!(read_ghost(&file).unwrap().kind, GhostKind::File);
        assert_eq!(read_ghost(&dir).unwrap().kind, GhostKind::Directory);
    }

    #[test]
    fn kind_change_replaces_entry() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("alice/thing");

        write_ghost(&path, UUID, GhostKind::Directory).unwrap();
        write_ghost(&path.join("inner"), UUID, GhostKind::File).unwrap();
        write_ghost(&path, UUID, GhostKind::File).unwrap();

        assert!(path.is_file());
        assert_eq!(read_ghost(&path).unwrap().kind, GhostKind::File);
    }

    #[test]
    fn markerless_directories_are_not_entries() {
        let temp = tempfile::tempdir().unwrap();
        write_ghost(&temp.path().join("alice/a/b/c.txt"), UUID, GhostKind::File).unwrap();

        let found: Vec<IndexedEntry> = entries(temp.path()).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user, "alice");
        assert_eq!(found[0].rel, PathBuf::from("a/b/c.txt"));
    }

    #[test]
    fn remove_reports_absence() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("alice/gone");
        assert!(!remove_ghost(&path).unwrap());
        write_ghost(&path, UUID, GhostKind::Directory).unwrap();
        assert!(remove_ghost(&path).unwrap());
        assert!(!path.exists());
    }
}
