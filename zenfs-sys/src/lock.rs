// SPDX-License-Identifier: GPL-3.0-only

//! Advisory lock serializing writers of the system index
//!
//! Merge, materialization, watcher mutations and offload moves all take this
//! lock before touching the index. The lock is released when the guard drops.

use crate::error::{Result, SysError};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::trace;

pub struct IndexLock {
    _guard: Flock<File>,
    path: PathBuf,
}

impl IndexLock {
    /// Block until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::lock_with(path, FlockArg::LockExclusive)
    }

    /// Take the lock only if nobody else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        match Self::lock_with(path, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(lock)),
            Err(SysError::Lock { source, .. }) if source == nix::errno::Errno::EWOULDBLOCK => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_with(path: &Path, arg: FlockArg) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let guard = Flock::lock(file, arg).map_err(|(_, source)| SysError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        trace!("Locked {:?}", path);

        Ok(Self {
            _guard: guard,
            path: path.to_path_buf(),
        })
    }
}
