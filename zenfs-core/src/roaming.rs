// SPDX-License-Identifier: GPL-3.0-only

use crate::context::ZenfsContext;
use crate::error::Result;
use crate::materialize::{self, LinkStats};
use crate::merge;
use tracing::debug;
use zenfs_sys::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub merged: usize,
    /// `None` when the union filesystem serves the view
    pub links: Option<LinkStats>,
}

/// Merge every bound drive's index and refresh the symlink view.
pub fn sync(ctx: &ZenfsContext, notifier: &dyn Notifier) -> Result<SyncReport> {
    let merged = merge::merge(ctx)?;
    let links = materialize::materialize(ctx)?;

    if let Err(e) = notifier.notify("ZenFS", "Filesystem Sync Complete") {
        debug!("Notification failed: {}", e);
    }
    Ok(SyncReport { merged, links })
}
