// SPDX-License-Identifier: GPL-3.0-only

use crate::error::Result;
use crate::identity;
use std::fs;
use std::path::Path;
use tracing::warn;
use zenfs_sys::IndexLock;
use zenfs_types::{IgnoreRules, Layout};

/// Machine identifier used when `system_uuid` is absent
pub const DEFAULT_MACHINE_ID: &str = "system";

/// Configuration shared by every ZenFS operation, loaded once per process
#[derive(Debug, Clone)]
pub struct ZenfsContext {
    pub layout: Layout,
    pub rules: IgnoreRules,
    pub machine_id: String,
}

impl ZenfsContext {
    pub fn new(layout: Layout, rules: IgnoreRules, machine_id: impl Into<String>) -> Self {
        Self {
            layout,
            rules,
            machine_id: machine_id.into(),
        }
    }

    /// Read ignore rules and the machine identifier from the host.
    pub fn load(layout: Layout) -> Self {
        let rules = load_ignore_rules(&layout.ignore_file);
        let machine_id = read_machine_id(&layout.system_uuid_file);
        Self::new(layout, rules, machine_id)
    }

    pub fn lock_index(&self) -> Result<IndexLock> {
        Ok(IndexLock::acquire(&self.layout.lock_file)?)
    }

    /// A roaming drive is bound when its identity is reachable under its bind path.
    pub fn is_bound(&self, uuid: &str) -> bool {
        identity::read(&self.layout.roaming_mount(uuid))
            .is_some_and(|record| record.uuid == uuid)
    }

    /// UUIDs of every bound roaming drive, in directory order.
    pub fn bound_drives(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.layout.roaming_root) else {
            return Vec::new();
        };

        entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|uuid| self.is_bound(uuid))
            .collect()
    }
}

/// Missing or unreadable lists mean no rules.
pub fn load_ignore_rules(path: &Path) -> IgnoreRules {
    let Ok(content) = fs::read_to_string(path) else {
        return IgnoreRules::default();
    };
    match IgnoreRules::from_json(&content) {
        Ok(rules) => rules,
        Err(e) => {
            warn!("Ignoring malformed ignore list {:?}: {}", path, e);
            IgnoreRules::default()
        }
    }
}

pub fn read_machine_id(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_MACHINE_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_host_files_are_missing() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = ZenfsContext::load(Layout::rooted_at(temp.path()));
        assert!(ctx.rules.is_empty());
        assert_eq!(ctx.machine_id, DEFAULT_MACHINE_ID);
    }

    #[test]
    fn reads_machine_id_and_rules() {
        let temp = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(temp.path());
        fs::create_dir_all(&layout.zenfs_root).unwrap();
        fs::write(&layout.system_uuid_file, "Zx9Yw8Vu7Ts6Rq5P\n").unwrap();
        fs::write(&layout.ignore_file, r#"[".cache"]"#).unwrap();

        let ctx = ZenfsContext::load(layout);
        assert_eq!(ctx.machine_id, "Zx9Yw8Vu7Ts6Rq5P");
        assert_eq!(ctx.rules.len(), 1);
    }

    #[test]
    fn malformed_rules_fall_back_to_empty() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ignore.json");
        fs::write(&path, "{not a list").unwrap();
        assert!(load_ignore_rules(&path).is_empty());
    }
}
