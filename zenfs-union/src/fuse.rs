// SPDX-License-Identifier: GPL-3.0-only

//! Passthrough FUSE driver over a [`UnionResolver`]
//!
//! Inodes are handed out per virtual path and counted per kernel lookup; a
//! mapping is dropped when the kernel forgets the inode or the entry is
//! removed. Every request re-resolves its path, so drives appearing or
//! disappearing take effect on the next lookup. Nothing is cached: attribute
//! and entry TTLs are zero.

use crate::error::{Result, UnionError};
use crate::resolve::{Resolved, UnionResolver};
use dashmap::DashMap;
use fuser::consts::*;
use fuser::{
    FileAttr, FileType, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use std::ffi::OsStr;
use std::fs::{self, DirBuilder, File, FileTimes, OpenOptions, Permissions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::ZERO;
const ROOT_INODE: u64 = 1;

/// Extract the ok value from a result, or reply with an error in FUSE
macro_rules! unwrap {
    ($reply:ident, $op:expr) => {{
        match $op {
            Ok(r) => r,
            Err(err) => err!($reply, UnionError::from(err)),
        }
    }};
}

/// Reply with an error to FUSE and return
macro_rules! err {
    ($reply:ident, $err:expr) => {{
        let err: UnionError = $err;
        tracing::debug!("{err}");
        $reply.error(err.errno());
        return;
    }};
}

pub struct UnionFs {
    resolver: UnionResolver,
    next_inode: AtomicU64,
    next_handle: AtomicU64,
    inodes: DashMap<u64, PathBuf>,
    paths: DashMap<PathBuf, u64>,
    /// Outstanding kernel lookups per inode
    lookups: DashMap<u64, u64>,
    handles: DashMap<u64, File>,
}

impl UnionFs {
    pub fn new(resolver: UnionResolver) -> Self {
        let fs = Self {
            resolver,
            next_inode: AtomicU64::new(ROOT_INODE + 1),
            // handle 0 is never allocated
            next_handle: AtomicU64::new(1),
            inodes: DashMap::new(),
            paths: DashMap::new(),
            lookups: DashMap::new(),
            handles: DashMap::new(),
        };
        fs.inodes.insert(ROOT_INODE, PathBuf::new());
        fs.paths.insert(PathBuf::new(), ROOT_INODE);
        fs
    }

    fn inode_for(&self, rel: &Path) -> u64 {
        if let Some(ino) = self.paths.get(rel) {
            return *ino;
        }
        let ino = self.next_inode.fetch_add(1, Ordering::Relaxed);
        self.paths.insert(rel.to_path_buf(), ino);
        self.inodes.insert(ino, rel.to_path_buf());
        ino
    }

    /// Inode number to report in a directory listing. Listings do not count
    /// as lookups, so unknown paths get a number without a mapping.
    fn listing_inode(&self, rel: &Path) -> u64 {
        match self.paths.get(rel) {
            Some(ino) => *ino,
            None => self.next_inode.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Inode for an entry handed to the kernel; counts one lookup.
    fn remember(&self, rel: &Path) -> u64 {
        let ino = self.inode_for(rel);
        *self.lookups.entry(ino).or_insert(0) += 1;
        ino
    }

    /// Drop `nlookup` kernel references; the mapping goes with the last one.
    fn release_lookups(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let remaining = match self.lookups.get_mut(&ino) {
            Some(mut count) => {
                *count = count.saturating_sub(nlookup);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.lookups.remove(&ino);
            if let Some((_, rel)) = self.inodes.remove(&ino) {
                self.paths.remove_if(&rel, |_, mapped| *mapped == ino);
            }
        }
    }

    /// Forget the mapping of a path that no longer exists.
    fn drop_path(&self, rel: &Path) {
        if let Some((_, ino)) = self.paths.remove(rel) {
            if ino != ROOT_INODE {
                self.inodes.remove(&ino);
                self.lookups.remove(&ino);
            }
        }
    }

    /// Remove a file or empty directory and its inode mapping.
    fn remove_entry(&self, parent: u64, name: &OsStr, is_dir: bool) -> Result<()> {
        let rel = self.child_path(parent, name)?;
        let real = self.real_path(&rel)?;
        if is_dir {
            fs::remove_dir(&real)?;
        } else {
            fs::remove_file(&real)?;
        }
        self.drop_path(&rel);
        Ok(())
    }

    fn virtual_path(&self, ino: u64) -> Result<PathBuf> {
        self.inodes
            .get(&ino)
            .map(|p| p.value().clone())
            .ok_or(UnionError::UnknownInode(ino))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<PathBuf> {
        Ok(self.virtual_path(parent)?.join(name))
    }

    fn real_path(&self, rel: &Path) -> Result<PathBuf> {
        match self.resolver.resolve(rel) {
            Resolved::Missing(_) => Err(UnionError::NotFound(rel.to_path_buf())),
            resolved => Ok(resolved.path().to_path_buf()),
        }
    }

    fn attr(&self, rel: &Path, real: &Path) -> Result<FileAttr> {
        let metadata = fs::symlink_metadata(real)?;
        Ok(attr_from_metadata(self.inode_for(rel), &metadata))
    }

    fn allocate_handle(&self, file: File) -> u64 {
        let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, file);
        fh
    }

    /// Move inode bookkeeping from `from` (and below) to `to`.
    fn rename_paths(&self, from: &Path, to: &Path) {
        let moved: Vec<(PathBuf, u64)> = self
            .paths
            .iter()
            .filter(|entry| entry.key().starts_with(from))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        for (old, ino) in moved {
            let Ok(suffix) = old.strip_prefix(from) else {
                continue;
            };
            let new = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            self.paths.remove(&old);
            self.paths.insert(new.clone(), ino);
            self.inodes.insert(ino, new);
        }
    }
}

fn attr_from_metadata(ino: u64, metadata: &fs::Metadata) -> FileAttr {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        FileType::Directory
    } else if file_type.is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    };
    let time = |secs: i64, nsecs: i64| {
        if secs >= 0 {
            UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
        } else {
            UNIX_EPOCH
        }
    };

    FileAttr {
        ino,
        size: metadata.size(),
        blocks: metadata.blocks(),
        atime: time(metadata.atime(), metadata.atime_nsec()),
        mtime: time(metadata.mtime(), metadata.mtime_nsec()),
        ctime: time(metadata.ctime(), metadata.ctime_nsec()),
        crtime: time(metadata.ctime(), metadata.ctime_nsec()),
        kind,
        perm: (metadata.mode() & 0o7777) as u16,
        nlink: metadata.nlink() as u32,
        uid: metadata.uid(),
        gid: metadata.gid(),
        rdev: metadata.rdev() as u32,
        blksize: metadata.blksize() as u32,
        flags: 0,
    }
}

fn open_options(flags: i32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    options
        .append(flags & libc::O_APPEND != 0)
        .truncate(flags & libc::O_TRUNC != 0);
    options
}

fn system_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// Hand a freshly created entry to the requesting user.
fn chown_to_requester(path: &Path, req: &Request<'_>) -> std::io::Result<()> {
    std::os::unix::fs::lchown(path, Some(req.uid()), Some(req.gid()))
}

// these functions mirror the actual fuse ones and
// so we don't have much control over the shape
#[allow(clippy::too_many_arguments)]
impl fuser::Filesystem for UnionFs {
    fn init(
        &mut self,
        _req: &Request<'_>,
        config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        const DESIRED: &[(&str, u64)] = &[
            ("FUSE_ASYNC_READ", FUSE_ASYNC_READ),
            ("FUSE_BIG_WRITES", FUSE_BIG_WRITES),
        ];
        let all_desired = DESIRED.iter().fold(0, |prev, (_, i)| prev | i);
        if let Err(unsupported) = config.add_capabilities(all_desired) {
            for (name, _) in DESIRED.iter().filter(|d| d.1 & unsupported != 0) {
                tracing::warn!("FUSE feature rejected: {name}");
            }
            let _ = config.add_capabilities(all_desired & !unsupported);
        }
        tracing::info!(
            "Filesystem initialized ({} mode)",
            if self.resolver.is_union() { "union" } else { "mirror" }
        );
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let rel = unwrap!(reply, self.child_path(parent, name));
        let real = unwrap!(reply, self.real_path(&rel));
        let mut attr = unwrap!(reply, self.attr(&rel, &real));
        attr.ino = self.remember(&rel);
        reply.entry(&TTL, &attr, 0);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.release_lookups(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let rel = unwrap!(reply, self.virtual_path(ino));
        let real = unwrap!(reply, self.real_path(&rel));
        let attr = unwrap!(reply, self.attr(&rel, &real));
        reply.attr(&TTL, &attr);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let rel = unwrap!(reply, self.virtual_path(ino));
        let real = unwrap!(reply, self.real_path(&rel));

        if let Some(mode) = mode {
            unwrap!(reply, fs::set_permissions(&real, Permissions::from_mode(mode)));
        }
        if uid.is_some() || gid.is_some() {
            unwrap!(reply, std::os::unix::fs::lchown(&real, uid, gid));
        }
        if let Some(size) = size {
            match fh.and_then(|fh| self.handles.get(&fh)) {
                Some(file) => unwrap!(reply, file.set_len(size)),
                None => {
                    let file = unwrap!(reply, OpenOptions::new().write(true).open(&real));
                    unwrap!(reply, file.set_len(size));
                }
            }
        }
        if atime.is_some() || mtime.is_some() {
            let mut times = FileTimes::new();
            if let Some(atime) = atime {
                times = times.set_accessed(system_time(atime));
            }
            if let Some(mtime) = mtime {
                times = times.set_modified(system_time(mtime));
            }
            let file = unwrap!(reply, File::open(&real));
            unwrap!(reply, file.set_times(times));
        }

        let attr = unwrap!(reply, self.attr(&rel, &real));
        reply.attr(&TTL, &attr);
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let rel = unwrap!(reply, self.virtual_path(ino));
        let real = unwrap!(reply, self.real_path(&rel));
        let target = unwrap!(reply, fs::read_link(&real));
        reply.data(target.as_os_str().as_bytes());
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let parent_rel = unwrap!(reply, self.virtual_path(parent));
        let rel = parent_rel.join(name);
        let real = self.resolver.creation_path(&parent_rel, name);

        unwrap!(reply, DirBuilder::new().mode(mode & !umask).create(&real));
        if let Err(e) = chown_to_requester(&real, req) {
            tracing::warn!("Failed to chown {:?}: {}", real, e);
        }
        let mut attr = unwrap!(reply, self.attr(&rel, &real));
        attr.ino = self.remember(&rel);
        reply.entry(&TTL, &attr, 0);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        unwrap!(reply, self.remove_entry(parent, name, false));
        reply.ok();
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        unwrap!(reply, self.remove_entry(parent, name, true));
        reply.ok();
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from_rel = unwrap!(reply, self.child_path(parent, name));
        let from = unwrap!(reply, self.real_path(&from_rel));
        let to_parent = unwrap!(reply, self.virtual_path(newparent));
        let to_rel = to_parent.join(newname);
        let to = match self.resolver.resolve(&to_rel) {
            Resolved::Missing(_) => self.resolver.creation_path(&to_parent, newname),
            existing => existing.path().to_path_buf(),
        };

        unwrap!(reply, fs::rename(&from, &to));
        if from_rel != to_rel {
            self.drop_path(&to_rel);
        }
        self.rename_paths(&from_rel, &to_rel);
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let rel = unwrap!(reply, self.virtual_path(ino));
        let real = unwrap!(reply, self.real_path(&rel));
        let file = unwrap!(reply, open_options(flags).open(&real));
        let fh = self.allocate_handle(file);
        tracing::trace!("open {ino} = {fh}");
        reply.opened(fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(file) = self.handles.get(&fh) else {
            err!(reply, UnionError::BadHandle(fh));
        };

        let mut buf = vec![0; size as usize];
        let mut consumed = 0;
        while consumed < size as usize {
            let count = unwrap!(
                reply,
                file.read_at(&mut buf[consumed..], consumed as u64 + offset as u64)
            );
            if count == 0 {
                break;
            }
            consumed += count;
        }
        reply.data(&buf[..consumed]);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(file) = self.handles.get(&fh) else {
            err!(reply, UnionError::BadHandle(fh));
        };
        unwrap!(reply, file.write_all_at(data, offset as u64));
        reply.written(data.len() as u32);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if self.handles.remove(&fh).is_none() {
            err!(reply, UnionError::BadHandle(fh));
        }
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let rel = unwrap!(reply, self.virtual_path(ino));
        let parent_ino = rel
            .parent()
            .map(|parent| self.listing_inode(parent))
            .unwrap_or(ROOT_INODE);

        let mut entries = vec![
            (ino, FileType::Directory, ".".into()),
            (parent_ino, FileType::Directory, "..".into()),
        ];
        for (name, real) in self.resolver.list(&rel) {
            let kind = match fs::symlink_metadata(&real) {
                Ok(m) if m.is_dir() => FileType::Directory,
                Ok(m) if m.file_type().is_symlink() => FileType::Symlink,
                Ok(_) => FileType::RegularFile,
                Err(_) => continue,
            };
            entries.push((self.listing_inode(&rel.join(&name)), kind, name));
        }

        for (index, (child_ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset as usize)
        {
            if reply.add(child_ino, (index + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let parent_rel = unwrap!(reply, self.virtual_path(parent));
        let rel = parent_rel.join(name);
        let real = self.resolver.creation_path(&parent_rel, name);

        let mut options = open_options(flags);
        if flags & libc::O_ACCMODE == libc::O_RDONLY {
            options.write(true);
        }
        let file = unwrap!(
            reply,
            options.create(true).mode(mode & !umask).open(&real)
        );
        if let Err(e) = chown_to_requester(&real, req) {
            tracing::warn!("Failed to chown {:?}: {}", real, e);
        }
        let mut attr = unwrap!(reply, self.attr(&rel, &real));
        attr.ino = self.remember(&rel);
        let fh = self.allocate_handle(file);
        reply.created(&TTL, &attr, 0, fh, 0);
    }
}

/// Mount `fs` at `mountpoint` on a background thread.
///
/// The filesystem stays mounted until the returned session is dropped.
pub fn spawn_mount(fs: UnionFs, mountpoint: &Path) -> Result<fuser::BackgroundSession> {
    let options = [
        MountOption::FSName("zenfs".to_string()),
        MountOption::AllowOther,
        MountOption::DefaultPermissions,
    ];
    fuser::spawn_mount2(fs, mountpoint, &options).map_err(|source| UnionError::Mount {
        path: mountpoint.to_path_buf(),
        source,
    })
}
