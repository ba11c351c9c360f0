// SPDX-License-Identifier: GPL-3.0-only

//! Iterative directory traversal
//!
//! Walks a tree with an explicit worklist instead of recursion. Symlinks are
//! reported but never followed, so link cycles cannot trap the walk. A parent
//! directory is always yielded before anything inside it.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// 1 for direct children of the root
    pub depth: usize,
    pub kind: EntryKind,
    pub size: u64,
    dev: u64,
}

impl WalkEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

type EntryFilter = Box<dyn FnMut(&WalkEntry) -> bool>;

pub struct TreeWalk {
    dirs: Vec<(PathBuf, usize)>,
    pending: Vec<WalkEntry>,
    max_depth: Option<usize>,
    root_dev: Option<u64>,
    filter: Option<EntryFilter>,
    skipped_errors: u64,
}

impl TreeWalk {
    /// Walk everything below `root` (the root itself is not yielded).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            dirs: vec![(root.into(), 0)],
            pending: Vec::new(),
            max_depth: None,
            root_dev: None,
            filter: None,
            skipped_errors: 0,
        }
    }

    /// Do not descend below `depth`.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Stay on the filesystem that holds the root.
    pub fn same_device(mut self) -> Self {
        self.root_dev = self
            .dirs
            .first()
            .and_then(|(root, _)| fs::metadata(root).ok())
            .map(|meta| meta.dev());
        self
    }

    /// Entries rejected by `filter` are neither yielded nor descended into.
    pub fn filter_entry<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&WalkEntry) -> bool + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Directory entries that could not be read so far
    pub fn skipped_errors(&self) -> u64 {
        self.skipped_errors
    }

    fn fill(&mut self, directory: &Path, depth: usize) {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(_) => {
                self.skipped_errors += 1;
                return;
            }
        };

        let mut batch = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => {
                    self.skipped_errors += 1;
                    continue;
                }
            };

            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => {
                    self.skipped_errors += 1;
                    continue;
                }
            };

            let file_type = metadata.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };

            let walk_entry = WalkEntry {
                path,
                depth: depth + 1,
                kind,
                size: metadata.len(),
                dev: metadata.dev(),
            };

            if let Some(filter) = self.filter.as_mut() {
                if !filter(&walk_entry) {
                    continue;
                }
            }

            batch.push(walk_entry);
        }

        // popped from the back, so reverse to keep read_dir order
        batch.reverse();
        self.pending.extend(batch);
    }
}

impl Iterator for TreeWalk {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        loop {
            if let Some(entry) = self.pending.pop() {
                let descend = entry.is_dir()
                    && self.max_depth.is_none_or(|max| entry.depth < max)
                    && self.root_dev.is_none_or(|dev| dev == entry.dev);
                if descend {
                    self.dirs.push((entry.path.clone(), entry.depth));
                }
                return Some(entry);
            }

            let (directory, depth) = self.dirs.pop()?;
            self.fill(&directory, depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn yields_parents_before_children() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/c.txt"), b"x").unwrap();
        fs::write(temp.path().join("top.txt"), b"x").unwrap();

        let paths: Vec<PathBuf> = TreeWalk::new(temp.path()).map(|e| e.path).collect();
        let pos = |p: &str| paths.iter().position(|x| x == &temp.path().join(p)).unwrap();

        assert_eq!(paths.len(), 4);
        assert!(pos("a") < pos("a/b"));
        assert!(pos("a/b") < pos("a/b/c.txt"));
    }

    #[test]
    fn reports_symlinks_without_following() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("real")).unwrap();
        fs::write(temp.path().join("real/file"), b"x").unwrap();
        symlink(temp.path(), temp.path().join("real/loop")).unwrap();

        let entries: Vec<WalkEntry> = TreeWalk::new(temp.path()).collect();
        assert_eq!(entries.len(), 3);
        let link = entries
            .iter()
            .find(|e| e.path.ends_with("loop"))
            .expect("symlink reported");
        assert_eq!(link.kind, EntryKind::Symlink);
    }

    #[test]
    fn filtered_directories_are_not_descended() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join(".cache/deep")).unwrap();
        fs::write(temp.path().join(".cache/deep/blob"), b"x").unwrap();
        fs::write(temp.path().join("keep"), b"x").unwrap();

        let entries: Vec<WalkEntry> = TreeWalk::new(temp.path())
            .filter_entry(|e| !e.path.ends_with(".cache"))
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("keep"));
    }

    #[test]
    fn max_depth_limits_descent() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();

        let entries: Vec<WalkEntry> = TreeWalk::new(temp.path()).max_depth(1).collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_root_counts_error() {
        let mut walk = TreeWalk::new("/nonexistent/zenfs/walk");
        assert!(walk.next().is_none());
        assert_eq!(walk.skipped_errors(), 1);
    }
}
