// SPDX-License-Identifier: GPL-3.0-only

//! Live view of home directories as a FUSE filesystem
//!
//! Mirror mode passes a source directory straight through. Union mode merges
//! the local home tree with the `Users/` tree of every bound roaming drive so
//! that files appear without symlinks.

pub mod error;
pub mod fuse;
pub mod resolve;

pub use error::{Result, UnionError};
pub use fuse::{UnionFs, spawn_mount};
pub use resolve::{Resolved, UnionResolver};
