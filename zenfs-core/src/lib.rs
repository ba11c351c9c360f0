// SPDX-License-Identifier: GPL-3.0-only

//! ZenFS drive identity and ghost database
//!
//! This crate keeps a user's home spread across several drives consistent:
//!
//! - [`identity`]: the `drive.json` record carried by every drive
//! - [`builder`]: full rescan of one drive's ghost index
//! - [`lifecycle`]: attach, detach, mint and the boot-time checker
//! - [`merge`]: folding drive indexes into the system index
//! - [`materialize`]: the symlink view of the system index
//! - [`watcher`]: incremental index updates from filesystem events
//! - [`offload`]: moving large local files to roaming drives
//!
//! Host side effects go through the traits in `zenfs-sys`, so everything here
//! can run against a temporary directory.

pub mod builder;
pub mod config_links;
pub mod context;
pub mod error;
pub mod ghost;
pub mod identity;
pub mod lifecycle;
pub mod materialize;
pub mod merge;
pub mod offload;
pub mod reverse_index;
pub mod roaming;
pub mod watcher;

pub use context::ZenfsContext;
pub use error::{Result, ZenfsError};
pub use ghost::{GhostEntry, GhostKind};
pub use lifecycle::{AttachOutcome, DriveManager};
pub use offload::{OffloadMover, OffloadOutcome, OffloadReport};
pub use reverse_index::{ReverseIndex, SharedReverseIndex};
pub use watcher::IndexWatcher;
