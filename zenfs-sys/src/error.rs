// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Required tool not found: {0}")]
    ToolNotFound(String),

    #[error("command failed: {command}; stderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("invalid mountinfo line: {0}")]
    InvalidMountInfoLine(String),

    #[error("statvfs failed for {path:?}: {source}")]
    Usage {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[error("could not lock {path:?}: {source}")]
    Lock {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
