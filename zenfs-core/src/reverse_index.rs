// SPDX-License-Identifier: GPL-3.0-only

//! In-memory `(user, path) -> drive` map built from the system index

use crate::ghost;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Reverse index shared between the union filesystem and the watcher
pub type SharedReverseIndex = Arc<RwLock<ReverseIndex>>;

#[derive(Debug, Default, Clone)]
pub struct ReverseIndex {
    owners: HashMap<(String, PathBuf), String>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every entry of the index rooted at `db_root`.
    pub fn load(db_root: &Path) -> Self {
        let mut index = Self::new();
        for entry in ghost::entries(db_root) {
            index.insert(&entry.user, &entry.rel, &entry.entry.owner);
        }
        debug!("Reverse index loaded with {} entries", index.len());
        index
    }

    pub fn shared(self) -> SharedReverseIndex {
        Arc::new(RwLock::new(self))
    }

    pub fn insert(&mut self, user: &str, rel: &Path, owner: &str) {
        self.owners
            .insert((user.to_string(), rel.to_path_buf()), owner.to_string());
    }

    /// Remove `rel` and everything indexed below it.
    pub fn remove(&mut self, user: &str, rel: &Path) -> usize {
        let before = self.owners.len();
        self.owners
            .retain(|(u, path), _| !(u == user && path.starts_with(rel)));
        before - self.owners.len()
    }

    pub fn owner(&self, user: &str, rel: &Path) -> Option<&str> {
        self.owners
            .get(&(user.to_string(), rel.to_path_buf()))
            .map(String::as_str)
    }

    /// Owner of a path of the form `<user>/<rel>`.
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        let (user, rel) = split_user(path)?;
        self.owner(&user, &rel)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Split `<user>/<rel>` into its parts. A bare user has an empty `rel`.
pub fn split_user(path: &Path) -> Option<(String, PathBuf)> {
    let mut components = path
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::CurDir));
    let user = match components.next()? {
        Component::Normal(name) => name.to_str()?.to_string(),
        _ => return None,
    };
    Some((user, components.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ghost::{GhostKind, write_ghost};

    #[test]
    fn loads_entries_from_index() {
        let temp = tempfile::tempdir().unwrap();
        let owner = "Ab3dEf7hIj9kLm0p";
        write_ghost(&temp.path().join("alice/Music"), owner, GhostKind::Directory).unwrap();
        write_ghost(&temp.path().join("alice/Music/a.flac"), owner, GhostKind::File).unwrap();

        let index = ReverseIndex::load(temp.path());
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.owner_of(Path::new("/alice/Music/a.flac")),
            Some("Ab3dEf7hIj9kLm0p")
        );
    }

    #[test]
    fn removing_a_directory_drops_descendants() {
        let mut index = ReverseIndex::new();
        index.insert("alice", Path::new("Music"), "Ab3dEf7hIj9kLm0p");
        index.insert("alice", Path::new("Music/a.flac"), "Ab3dEf7hIj9kLm0p");
        index.insert("alice", Path::new("Musical.txt"), "Ab3dEf7hIj9kLm0p");
        index.insert("bob", Path::new("Music"), "Zx9Yw8Vu7Ts6Rq5P");

        assert_eq!(index.remove("alice", Path::new("Music")), 2);
        assert_eq!(index.owner("alice", Path::new("Musical.txt")), Some("Ab3dEf7hIj9kLm0p"));
        assert_eq!(index.owner("bob", Path::new("Music")), Some("Zx9Yw8Vu7Ts6Rq5P"));
    }

    #[test]
    fn split_user_handles_bare_user() {
        assert_eq!(
            split_user(Path::new("/alice")),
            Some(("alice".to_string(), PathBuf::new()))
        );
        assert_eq!(split_user(Path::new("/")), None);
    }
}
