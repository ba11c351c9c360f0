// SPDX-License-Identifier: GPL-3.0-only

//! Ignore rules shared by the builder, watcher and offload mover
//!
//! Each rule is either a path prefix relative to a user's root (it contains a
//! `/`) or a file-name glob. A single leading `*` is stripped before deciding
//! which kind a rule is, so `*Downloads/Temp` is still a prefix rule.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreRules {
    rules: Vec<String>,
}

impl IgnoreRules {
    pub fn new(rules: Vec<String>) -> Self {
        Self { rules }
    }

    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether `path` (somewhere below `relative_root`) is excluded.
    ///
    /// Name rules apply to every component below `relative_root`, so anything
    /// inside an ignored directory is ignored too. Paths outside
    /// `relative_root` are never ignored.
    pub fn is_ignored(&self, path: &Path, relative_root: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(relative_root) else {
            return false;
        };
        let names: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let rel_str = names.join("/");

        self.rules.iter().any(|rule| {
            let clean = rule.strip_prefix('*').unwrap_or(rule);
            if clean.contains('/') {
                return rel_str.starts_with(clean);
            }
            let pattern = glob::Pattern::new(rule).ok();
            names.iter().any(|name| {
                rule == name
                    || pattern
                        .as_ref()
                        .is_some_and(|pattern| pattern.matches(name))
            })
        })
    }
}
