// SPDX-License-Identifier: GPL-3.0-only

//! Low-level host operations for ZenFS
//!
//! This crate wraps the system facilities the drive subsystem needs:
//! - Mount, bind-mount and unmount through the system tools
//! - Mount table inspection via `/proc/self/mountinfo`
//! - Filesystem usage via `statvfs`
//! - Iterative directory walks that never follow symlinks
//! - The advisory lock that serializes index writers
//! - Desktop notifications over the session bus
//!
//! Mount operations require elevated privileges; everything that touches the
//! host is reachable through a trait so callers can substitute fakes.

pub mod error;
pub mod lock;
pub mod mount;
pub mod mountinfo;
pub mod notify;
pub mod usage;
pub mod walk;

pub use error::{Result, SysError};
pub use lock::IndexLock;
pub use mount::{MountTool, Mounter};
pub use mountinfo::{MountEntry, parse_mountinfo, read_mount_table};
pub use notify::{DesktopNotifier, Notifier, SilentNotifier};
pub use usage::{DiskUsage, StatvfsUsage, UsageSource, usage_for_path};
pub use walk::{EntryKind, TreeWalk, WalkEntry};
