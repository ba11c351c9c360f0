// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for ZenFS
//!
//! This crate defines the types shared by every part of the stack:
//!
//! - **zenfs-sys**: host operations keyed by the paths in [`Layout`]
//! - **zenfs-core**: reads and writes [`DriveRecord`]s, honors [`IgnoreRules`]
//! - **zenfs-union**: resolves virtual paths against the same [`Layout`]
//! - **zenfs-cli**: deserializes [`Layout`] and [`OffloadConfig`] from disk
//!
//! Nothing here touches a mounted drive; I/O lives in the crates above.

pub mod drive;
pub mod ignore;
pub mod layout;
pub mod offload;

pub use drive::*;
pub use ignore::*;
pub use layout::*;
pub use offload::*;
