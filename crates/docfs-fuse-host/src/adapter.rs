//! DocFS FUSE adapter implementation
//!
//! Maps FUSE operations to DocFS Core calls.

#[cfg(not(feature = "fuse"))]
compile_error!("This module requires the 'fuse' feature to be enabled");

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use docfs_core::{Attributes, FsCore, FsError, HandleId};
use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen,
    ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::{c_int, EINVAL, ENOENT};
use tracing::{debug, error, info};

use crate::inodes::InodeTable;

/// DocFS FUSE filesystem adapter
pub struct DocFsFuse {
    core: FsCore,
    inodes: InodeTable,
    attr_ttl: Duration,
    entry_ttl: Duration,
    block_size: u32,
}

/// Errno for a core error; failures that reach the backend are logged.
fn errno(op: &str, err: FsError) -> c_int {
    match &err {
        FsError::Backend(_) | FsError::CorruptContent(_) => error!(op, error = %err, "operation failed"),
        _ => debug!(op, error = %err, "operation rejected"),
    }
    err.errno()
}

fn kind(file_type: docfs_core::FileType) -> FileType {
    match file_type {
        docfs_core::FileType::File => FileType::RegularFile,
        docfs_core::FileType::Directory => FileType::Directory,
        docfs_core::FileType::Symlink => FileType::Symlink,
    }
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl DocFsFuse {
    pub fn new(core: FsCore) -> Self {
        let config = core.config();
        let attr_ttl = Duration::from_millis(u64::from(config.cache.attr_ttl_ms));
        let entry_ttl = Duration::from_millis(u64::from(config.cache.entry_ttl_ms));
        let block_size = config.statfs.block_size;
        Self {
            core,
            inodes: InodeTable::new(),
            attr_ttl,
            entry_ttl,
            block_size,
        }
    }

    fn attr_to_fuse(&self, attr: &Attributes) -> FileAttr {
        FileAttr {
            ino: attr.node.0,
            size: attr.size,
            blocks: (attr.size + 511) / 512,
            atime: attr.times.atime,
            mtime: attr.times.mtime,
            ctime: attr.times.ctime,
            crtime: attr.times.birthtime,
            kind: kind(attr.file_type),
            perm: (attr.mode & 0o7777) as u16,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: self.block_size,
            flags: 0,
        }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<PathBuf, c_int> {
        self.inodes.child_path(parent, name).ok_or(ENOENT)
    }

    fn path(&self, ino: u64) -> Result<PathBuf, c_int> {
        self.inodes.path(ino).map(Path::to_path_buf).ok_or(ENOENT)
    }

    /// Look up `path`, remember its inode and build the entry reply.
    fn entry(&mut self, path: PathBuf, op: &str) -> Result<FileAttr, c_int> {
        let attr = self.core.getattr(&path).map_err(|e| errno(op, e))?;
        let fuse_attr = self.attr_to_fuse(&attr);
        self.inodes.remember(fuse_attr.ino, path);
        Ok(fuse_attr)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &mut self,
        path: &Path,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        fh: Option<u64>,
    ) -> Result<FileAttr, FsError> {
        if let Some(mode) = mode {
            self.core.set_mode(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.core.set_owner(path, uid, gid)?;
        }
        if let Some(size) = size {
            match fh {
                Some(fh) => self.core.truncate(HandleId(fh), size)?,
                None => self.core.truncate_path(path, size)?,
            }
        }
        if atime.is_some() || mtime.is_some() {
            self.core
                .set_times(path, atime.map(resolve_time), mtime.map(resolve_time))?;
        }
        let attr = self.core.getattr(path)?;
        Ok(self.attr_to_fuse(&attr))
    }
}

impl fuser::Filesystem for DocFsFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut fuser::KernelConfig) -> Result<(), c_int> {
        info!("DocFS FUSE adapter initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!(open_handles = self.core.open_handles(), "DocFS FUSE adapter destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = self.child_path(parent, name).and_then(|path| self.entry(path, "lookup"));
        match result {
            Ok(attr) => reply.entry(&self.entry_ttl, &attr, 0),
            Err(code) => reply.error(code),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let result = self
            .path(ino)
            .and_then(|path| self.core.getattr(&path).map_err(|e| errno("getattr", e)));
        match result {
            Ok(attr) => reply.attr(&self.attr_ttl, &self.attr_to_fuse(&attr)),
            Err(code) => reply.error(code),
        }
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
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.apply_setattr(&path, mode, uid, gid, size, atime, mtime, fh) {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr),
            Err(e) => reply.error(errno("setattr", e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let result = self
            .path(ino)
            .and_then(|path| self.core.readlink(&path).map_err(|e| errno("readlink", e)));
        match result {
            Ok(target) => reply.data(target.as_bytes()),
            Err(code) => reply.error(code),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let result = self.child_path(parent, name).and_then(|path| {
            self.core
                .mkdir(&path, mode & !umask & 0o7777)
                .map_err(|e| errno("mkdir", e))?;
            self.entry(path, "mkdir")
        });
        match result {
            Ok(attr) => reply.entry(&self.entry_ttl, &attr, 0),
            Err(code) => reply.error(code),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            self.core.unlink(&path).map_err(|e| errno("unlink", e))?;
            self.inodes.forget_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(code) => reply.error(code),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            self.core.rmdir(&path).map_err(|e| errno("rmdir", e))?;
            self.inodes.forget_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(code) => reply.error(code),
        }
    }

    fn symlink(&mut self, _req: &Request<'_>, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
        let result = self.child_path(parent, link_name).and_then(|path| {
            let target = target.to_str().ok_or(EINVAL)?;
            self.core.symlink(target, &path).map_err(|e| errno("symlink", e))?;
            self.entry(path, "symlink")
        });
        match result {
            Ok(attr) => reply.entry(&self.entry_ttl, &attr, 0),
            Err(code) => reply.error(code),
        }
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
        let result = self.child_path(parent, name).and_then(|from| {
            let to = self.child_path(newparent, newname)?;
            self.core.rename(&from, &to).map_err(|e| errno("rename", e))?;
            self.inodes.rename(&from, &to);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(code) => reply.error(code),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let result = self
            .path(ino)
            .and_then(|path| self.core.open(&path).map_err(|e| errno("open", e)));
        match result {
            Ok(handle) => reply.opened(handle.0, 0),
            Err(code) => reply.error(code),
        }
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
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(EINVAL);
        };
        match self.core.read(HandleId(fh), offset, size) {
            Ok(bytes) => reply.data(&bytes),
            Err(e) => reply.error(errno("read", e)),
        }
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
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(EINVAL);
        };
        match self.core.write(HandleId(fh), offset, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno("write", e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.core.flush(HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("flush", e)),
        }
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
        match self.core.release(HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("release", e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.core.fsync(HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("fsync", e)),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let entries = match self.core.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => return reply.error(errno("readdir", e)),
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in entries.iter().enumerate().skip(skip) {
            if entry.name != "." && entry.name != ".." {
                self.inodes.remember(entry.node.0, path.join(&entry.name));
            }
            // The offset handed back is where the next call resumes
            if reply.add(entry.node.0, (i + 1) as i64, kind(entry.file_type), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.core.statfs();
        reply.statfs(
            stats.blocks,
            stats.blocks_free,
            stats.blocks_available,
            stats.files,
            stats.files_free,
            stats.block_size,
            stats.name_max,
            stats.block_size,
        );
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let result = self.child_path(parent, name).and_then(|path| {
            let handle = self
                .core
                .create(&path, mode & !umask & 0o7777)
                .map_err(|e| errno("create", e))?;
            let attr = self.entry(path, "create")?;
            Ok((handle, attr))
        });
        match result {
            Ok((handle, attr)) => reply.created(&self.entry_ttl, &attr, 0, handle.0, 0),
            Err(code) => reply.error(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfs_core::{FsConfig, MemoryDocumentStore};
    use std::sync::Arc;

    fn adapter() -> DocFsFuse {
        let core = FsCore::new(FsConfig::default(), Arc::new(MemoryDocumentStore::new()));
        DocFsFuse::new(core)
    }

    #[test]
    fn test_root_attributes() {
        let adapter = adapter();
        let attr = adapter.core.getattr(Path::new("/")).unwrap();
        let fuse_attr = adapter.attr_to_fuse(&attr);
        assert_eq!(fuse_attr.ino, fuser::FUSE_ROOT_ID);
        assert_eq!(fuse_attr.kind, FileType::Directory);
        assert_eq!(fuse_attr.perm, 0o755);
        assert_eq!(fuse_attr.nlink, 2);
    }

    #[test]
    fn test_entry_remembers_inode() {
        let mut adapter = adapter();
        adapter.core.mkdir(Path::new("/docs"), 0o750).unwrap();
        let attr = adapter.entry(PathBuf::from("/docs"), "lookup").unwrap();
        assert_eq!(adapter.inodes.path(attr.ino), Some(Path::new("/docs")));
        assert!(matches!(adapter.entry(PathBuf::from("/missing"), "lookup"), Err(ENOENT)));
    }

    #[test]
    fn test_setattr_truncates_and_chmods() {
        let mut adapter = adapter();
        let h = adapter.core.create(Path::new("/f"), 0o644).unwrap();
        adapter.core.write(h, 0, b"abcdef").unwrap();

        let attr = adapter
            .apply_setattr(Path::new("/f"), Some(0o600), None, None, Some(2), None, Some(TimeOrNow::Now), Some(h.0))
            .unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.blocks, 1);
    }
}
