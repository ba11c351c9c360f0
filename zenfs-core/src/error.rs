// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use thiserror::Error;
use zenfs_sys::SysError;

/// Errors raised by drive and index operations
#[derive(Debug, Error)]
pub enum ZenfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(PathBuf),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Thread pool initialization failed: {0}")]
    ThreadPoolBuild(String),
}

pub type Result<T> = std::result::Result<T, ZenfsError>;
