// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No such entry: {0:?}")]
    NotFound(PathBuf),

    #[error("Unknown inode {0}")]
    UnknownInode(u64),

    #[error("Bad file handle {0}")]
    BadHandle(u64),

    #[error("Mount failed at {path:?}: {source}")]
    Mount {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl UnionError {
    /// Error number to hand back to the kernel
    pub fn errno(&self) -> i32 {
        match self {
            UnionError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            UnionError::NotFound(_) | UnionError::UnknownInode(_) => libc::ENOENT,
            UnionError::BadHandle(_) => libc::EBADF,
            UnionError::Mount { .. } => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, UnionError>;
