// SPDX-License-Identifier: GPL-3.0-only

//! Incremental index updates from filesystem events
//!
//! Watches the roaming root recursively. Every create or delete below
//! `<roaming root>/<uuid>/Users/<user>/<rest>` is mirrored into the drive's own
//! index and the system index at once. A rename is a delete of the source
//! followed by a create of the destination. The symlink view is not touched.

use crate::context::ZenfsContext;
use crate::error::Result;
use crate::ghost::{GhostKind, remove_ghost, write_ghost};
use crate::reverse_index::SharedReverseIndex;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zenfs_sys::{EntryKind, TreeWalk};
use zenfs_types::{DRIVE_USERS_DIR, DrivePaths};

/// A single index-relevant change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Removed(PathBuf),
}

/// A path split into its drive, user and user-relative parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoamingPath {
    pub uuid: String,
    pub user: String,
    pub rest: PathBuf,
}

/// Split `<roaming_root>/<uuid>/Users/<user>/<rest>`; anything else is `None`.
pub fn parse_roaming_path(roaming_root: &Path, path: &Path) -> Option<RoamingPath> {
    let rel = path.strip_prefix(roaming_root).ok()?;
    let mut parts = rel.components().map(|c| match c {
        Component::Normal(name) => name.to_str(),
        _ => None,
    });

    let uuid = parts.next()??;
    if parts.next()?? != DRIVE_USERS_DIR {
        return None;
    }
    let user = parts.next()??;
    let rest: Option<PathBuf> = parts.collect();
    let rest = rest?;
    if rest.as_os_str().is_empty() {
        return None;
    }

    Some(RoamingPath {
        uuid: uuid.to_string(),
        user: user.to_string(),
        rest,
    })
}

/// Index changes carried by one notify event, in application order.
pub fn changes_from(event: &Event) -> Vec<ChangeEvent> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(ChangeEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(ChangeEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() == 2 => vec![
                ChangeEvent::Removed(event.paths[0].clone()),
                ChangeEvent::Created(event.paths[1].clone()),
            ],
            RenameMode::From => event.paths.iter().cloned().map(ChangeEvent::Removed).collect(),
            RenameMode::To => event.paths.iter().cloned().map(ChangeEvent::Created).collect(),
            _ => event
                .paths
                .iter()
                .map(|path| {
                    if fs::symlink_metadata(path).is_ok() {
                        ChangeEvent::Created(path.clone())
                    } else {
                        ChangeEvent::Removed(path.clone())
                    }
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

pub struct IndexWatcher {
    ctx: ZenfsContext,
    reverse: Option<SharedReverseIndex>,
}

impl IndexWatcher {
    pub fn new(ctx: ZenfsContext) -> Self {
        Self { ctx, reverse: None }
    }

    /// Keep `reverse` patched alongside the on-disk indexes.
    pub fn with_reverse_index(mut self, reverse: SharedReverseIndex) -> Self {
        self.reverse = Some(reverse);
        self
    }

    /// Apply one change. Returns whether any index was touched.
    pub fn handle(&self, change: &ChangeEvent) -> Result<bool> {
        let path = match change {
            ChangeEvent::Created(path) | ChangeEvent::Removed(path) => path,
        };
        let Some(parsed) = parse_roaming_path(&self.ctx.layout.roaming_root, path) else {
            return Ok(false);
        };

        let drive = DrivePaths::new(self.ctx.layout.roaming_mount(&parsed.uuid));
        let user_root = drive.users().join(&parsed.user);
        if self.ctx.rules.is_ignored(path, &user_root) {
            debug!("Ignoring change to {:?}", path);
            return Ok(false);
        }

        let _lock = self.ctx.lock_index()?;
        match change {
            ChangeEvent::Created(_) => {
                let Ok(metadata) = fs::symlink_metadata(path) else {
                    // Gone again before we got to it
                    return Ok(false);
                };
                let kind = GhostKind::of(metadata.is_dir());
                self.record(&drive, &parsed.uuid, &parsed.user, &parsed.rest, kind)?;

                if kind == GhostKind::Directory {
                    self.record_subtree(&drive, &parsed, path, &user_root)?;
                }
                info!("Indexed {:?} on {}", path, parsed.uuid);
            }
            ChangeEvent::Removed(_) => {
                remove_ghost(&drive.ghost_entry(&parsed.user, &parsed.rest))?;
                remove_ghost(&self.ctx.layout.system_entry(&parsed.user, &parsed.rest))?;
                if let Some(reverse) = &self.reverse {
                    reverse
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&parsed.user, &parsed.rest);
                }
                info!("Unindexed {:?} on {}", path, parsed.uuid);
            }
        }
        Ok(true)
    }

    fn record(
        &self,
        drive: &DrivePaths,
        uuid: &str,
        user: &str,
        rel: &Path,
        kind: GhostKind,
    ) -> Result<()> {
        write_ghost(&drive.ghost_entry(user, rel), uuid, kind)?;
        write_ghost(&self.ctx.layout.system_entry(user, rel), uuid, kind)?;
        if let Some(reverse) = &self.reverse {
            reverse
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(user, rel, uuid);
        }
        Ok(())
    }

    /// A directory moved in whole arrives as one event; index what it holds.
    fn record_subtree(
        &self,
        drive: &DrivePaths,
        parsed: &RoamingPath,
        dir: &Path,
        user_root: &Path,
    ) -> Result<()> {
        let rules = self.ctx.rules.clone();
        let root = user_root.to_path_buf();
        let walk = TreeWalk::new(dir).filter_entry(move |e| !rules.is_ignored(&e.path, &root));

        for entry in walk {
            let kind = match entry.kind {
                EntryKind::Dir => GhostKind::Directory,
                EntryKind::File | EntryKind::Symlink => GhostKind::File,
                EntryKind::Other => continue,
            };
            let Ok(rel) = entry.path.strip_prefix(user_root) else {
                continue;
            };
            self.record(drive, &parsed.uuid, &parsed.user, rel, kind)?;
        }
        Ok(())
    }

    /// Consume events until interrupted.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for interrupts: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Consume events until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let roaming_root = self.ctx.layout.roaming_root.clone();
        fs::create_dir_all(&roaming_root)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&roaming_root, RecursiveMode::Recursive)?;
        info!("Watching {:?}", roaming_root);

        // Handlers block on the index lock and on disk I/O.
        let watcher = Arc::new(self);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(result) = received else {
                        warn!("Watcher channel closed");
                        break;
                    };
                    match result {
                        Ok(event) => {
                            let changes = changes_from(&event);
                            if changes.is_empty() {
                                continue;
                            }
                            let handler = Arc::clone(&watcher);
                            let applied = tokio::task::spawn_blocking(move || {
                                handler.apply_all(&changes)
                            })
                            .await;
                            if let Err(e) = applied {
                                error!("Event handler panicked: {}", e);
                            }
                        }
                        Err(e) => warn!("Watch error: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Watcher stopping");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Apply changes in order, logging failures.
    fn apply_all(&self, changes: &[ChangeEvent]) {
        for change in changes {
            if let Err(e) = self.handle(change) {
                error!("Failed to apply {:?}: {}", change, e);
            }
        }
    }
}
