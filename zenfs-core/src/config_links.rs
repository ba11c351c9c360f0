// SPDX-License-Identifier: GPL-3.0-only

//! Config-category link farm under the config root

use crate::error::Result;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;
use tracing::{info, warn};
use zenfs_types::Layout;

/// Category whose contents are managed elsewhere
pub const UNMANAGED_CATEGORY: &str = "ZenOS";

/// `{category: [target paths]}`
pub type CategoryMap = BTreeMap<String, Vec<PathBuf>>;

/// Create category directories and link every existing target into them.
///
/// Returns the number of links created. Existing entries are left alone.
pub fn sync_categories(layout: &Layout) -> Result<usize> {
    fs::create_dir_all(&layout.config_root)?;

    let content = match fs::read_to_string(&layout.config_map_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No config map at {:?}", layout.config_map_file);
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };
    let map: CategoryMap = serde_json::from_str(&content)?;

    let mut created = 0;
    for (category, targets) in &map {
        let category_dir = layout.config_root.join(category);
        fs::create_dir_all(&category_dir)?;
        if category == UNMANAGED_CATEGORY {
            continue;
        }

        for target in targets {
            let Some(name) = target.file_name() else {
                continue;
            };
            if !target.exists() {
                continue;
            }
            let link = category_dir.join(name);
            if fs::symlink_metadata(&link).is_ok() {
                continue;
            }
            match symlink(target, &link) {
                Ok(()) => created += 1,
                Err(e) => warn!("Failed to link {:?}: {}", target, e),
            }
        }
    }

    info!("Config categories synced ({} new links)", created);
    Ok(created)
}
