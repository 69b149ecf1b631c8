//! FUSE adapter
//!
//! Translates rfuse3's inode-addressed raw requests into path-based
//! [`GridOps`] calls. Errors map to errno through [`FsError::errno`].
pub mod inode;
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite, ReplyXAttr,
};
use rfuse3::{Errno, FileType as FuseFileType, Result as FuseResult, SetAttr, Timestamp};
use tracing::{debug, warn};

use crate::meta::xattr::XattrReply;
use crate::meta::{FileKind, FileStat, with_permissions};
use crate::vfs::{Caller, FsError, GridOps};
use inode::{InodeTable, join_path, parent_path};

const MAX_WRITE: u32 = 1024 * 1024;
/// Buffer offered to readlink; the kernel caps targets at PATH_MAX.
const READLINK_BUF: usize = libc::PATH_MAX as usize;
const BLOCK_SIZE: u32 = 4096;

impl From<FsError> for Errno {
    fn from(err: FsError) -> Self {
        if let FsError::Gateway(inner) = &err {
            warn!(error = %inner, "store request failed");
        }
        Errno::from(err.errno())
    }
}

impl From<&Request> for Caller {
    fn from(req: &Request) -> Self {
        Caller {
            uid: req.uid,
            gid: req.gid,
        }
    }
}

/// rfuse3 filesystem over any [`GridOps`] implementation.
pub struct GridFuse<F: GridOps> {
    fs: F,
    inodes: InodeTable,
    ttl: Duration,
}

impl<F: GridOps> GridFuse<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            ttl: Duration::from_secs(1),
        }
    }

    pub fn inner(&self) -> &F {
        &self.fs
    }

    fn path_of(&self, ino: u64) -> FuseResult<String> {
        self.inodes
            .path_of(ino)
            .ok_or_else(|| Errno::from(libc::ENOENT))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        let parent = self.path_of(parent)?;
        Ok(join_path(&parent, &name.to_string_lossy()))
    }

    async fn entry_for(&self, req: &Request, path: &str) -> FuseResult<ReplyEntry> {
        let stat = self.fs.getattr(Caller::from(req), path).await?;
        let ino = self.inodes.ino_of(path);
        Ok(ReplyEntry {
            ttl: self.ttl,
            attr: to_fuse_attr(ino, &stat),
            generation: 0,
        })
    }
}

fn to_fuse_kind(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::Directory => FuseFileType::Directory,
        FileKind::Symlink => FuseFileType::Symlink,
        FileKind::Regular => FuseFileType::RegularFile,
    }
}

fn to_timestamp(t: SystemTime) -> Timestamp {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => Timestamp::new(d.as_secs() as i64, d.subsec_nanos()),
        Err(_) => Timestamp::new(0, 0),
    }
}

fn from_timestamp(ts: Timestamp) -> SystemTime {
    if ts.sec < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(ts.sec as u64, ts.nsec)
}

fn to_fuse_attr(ino: u64, stat: &FileStat) -> FileAttr {
    let mtime = to_timestamp(stat.mtime);
    let ctime = to_timestamp(stat.ctime);
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.blocks,
        atime: mtime,
        mtime,
        ctime,
        #[cfg(target_os = "macos")]
        crtime: ctime,
        kind: to_fuse_kind(stat.kind()),
        perm: stat.perm(),
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

fn to_reply_xattr(reply: XattrReply) -> ReplyXAttr {
    match reply {
        XattrReply::Size(n) => ReplyXAttr::Size(n),
        XattrReply::Data(data) => ReplyXAttr::Data(Bytes::from(data)),
    }
}

impl<F: GridOps> Filesystem for GridFuse<F> {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let max_write = NonZeroU32::new(MAX_WRITE).unwrap_or(NonZeroU32::MIN);
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        debug!("filesystem destroyed");
    }

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        self.entry_for(&req, &path).await
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn getattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let stat = self.fs.getattr(Caller::from(&req), &path).await?;
        Ok(ReplyAttr {
            ttl: self.ttl,
            attr: to_fuse_attr(ino, &stat),
        })
    }

    async fn setattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let caller = Caller::from(&req);

        if let Some(mode) = set_attr.mode {
            let current = self.fs.getattr(caller, &path).await?;
            self.fs
                .chmod(&path, with_permissions(current.mode, mode))
                .await?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            self.fs.chown(&path, set_attr.uid, set_attr.gid).await?;
        }
        if let Some(mtime) = set_attr.mtime {
            self.fs.utimens(&path, from_timestamp(mtime)).await?;
        }
        if let Some(size) = set_attr.size {
            self.fs.truncate(&path, size).await?;
        }

        let stat = self.fs.getattr(caller, &path).await?;
        Ok(ReplyAttr {
            ttl: self.ttl,
            attr: to_fuse_attr(ino, &stat),
        })
    }

    async fn readlink(&self, _req: Request, ino: u64) -> FuseResult<ReplyData> {
        let path = self.path_of(ino)?;
        let mut target = self.fs.readlink(&path, READLINK_BUF).await?;
        if let Some(end) = target.iter().position(|b| *b == 0) {
            target.truncate(end);
        }
        Ok(ReplyData {
            data: Bytes::from(target),
        })
    }

    async fn symlink(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        link: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        self.fs
            .symlink(Caller::from(&req), &link.to_string_lossy(), &path)
            .await?;
        self.entry_for(&req, &path).await
    }

    async fn mknod(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        self.fs.mknod(&path, mode, rdev).await?;
        Err(libc::ENOSYS.into())
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        let caller = Caller::from(&req);
        if self.fs.getattr(caller, &path).await.is_ok() {
            return Err(libc::EEXIST.into());
        }
        self.fs.mkdir(caller, &path, mode & !umask).await?;
        self.entry_for(&req, &path).await
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_path(parent, name)?;
        self.fs.unlink(&path).await?;
        self.inodes.forget_path(&path);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_path(parent, name)?;
        self.fs.rmdir(&path).await?;
        self.inodes.forget_path(&path);
        Ok(())
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let from = self.child_path(parent, name)?;
        let to = self.child_path(new_parent, new_name)?;
        self.fs.rename(&from, &to).await?;
        self.inodes.rename(&from, &to);
        Ok(())
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        let fh = self.fs.open(&path, flags).await?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let path = self.path_of(ino)?;
        let data = self.fs.read(&path, offset, size as usize).await?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let path = self.path_of(ino)?;
        let written = self.fs.write(&path, data, offset).await?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        // the store reports no capacity; advertise a large, mostly free volume
        Ok(ReplyStatFs {
            blocks: 1 << 30,
            bfree: 1 << 29,
            bavail: 1 << 29,
            files: 1 << 20,
            ffree: 1 << 19,
            bsize: BLOCK_SIZE,
            namelen: 255,
            frsize: BLOCK_SIZE,
        })
    }

    async fn release(
        &self,
        _req: Request,
        inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        self.fs.release(&path, fh).await?;
        Ok(())
    }

    async fn fsync(&self, _req: Request, inode: u64, fh: u64, _datasync: bool) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        self.fs.flush(&path, fh).await?;
        Ok(())
    }

    async fn flush(&self, _req: Request, inode: u64, fh: u64, _lock_owner: u64) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        self.fs.flush(&path, fh).await?;
        Ok(())
    }

    async fn setxattr(
        &self,
        _req: Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: u32,
        _position: u32,
    ) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        self.fs
            .setxattr(&path, &name.to_string_lossy(), value)
            .await?;
        Ok(())
    }

    async fn getxattr(
        &self,
        _req: Request,
        ino: u64,
        name: &OsStr,
        size: u32,
    ) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(ino)?;
        let reply = self
            .fs
            .getxattr(&path, &name.to_string_lossy(), size)
            .await?;
        Ok(to_reply_xattr(reply))
    }

    async fn listxattr(&self, _req: Request, ino: u64, size: u32) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(ino)?;
        let reply = self.fs.listxattr(&path, size).await?;
        Ok(to_reply_xattr(reply))
    }

    async fn removexattr(&self, _req: Request, ino: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        self.fs
            .removexattr(&path, &name.to_string_lossy())
            .await?;
        Ok(())
    }

    async fn opendir(&self, req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        let stat = self.fs.getattr(Caller::from(&req), &path).await?;
        if stat.kind() != FileKind::Directory {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let path = self.path_of(ino)?;
        let entries = self.fs.readdir(&path).await?;

        let mut all = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            let inode = match entry.name.as_str() {
                "." => ino,
                ".." => self.inodes.ino_of(parent_path(&path)),
                name => self.inodes.ino_of(&join_path(&path, name)),
            };
            // each entry carries the offset of the one after it
            let next = i as i64 + 1;
            if next <= offset {
                continue;
            }
            all.push(DirectoryEntry {
                inode,
                kind: to_fuse_kind(entry.kind),
                name: OsString::from(entry.name),
                offset: next,
            });
        }

        let stream_iter = stream::iter(all.into_iter().map(Ok));
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream_iter);
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn releasedir(&self, _req: Request, _inode: u64, _fh: u64, _flags: u32) -> FuseResult<()> {
        Ok(())
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let path = self.child_path(parent, name)?;
        let caller = Caller::from(&req);
        let fh = self.fs.create(caller, &path, mode).await?;
        let stat = self.fs.getattr(caller, &path).await?;
        let ino = self.inodes.ino_of(&path);
        Ok(ReplyCreated {
            ttl: self.ttl,
            attr: to_fuse_attr(ino, &stat),
            generation: 0,
            fh,
            flags,
        })
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}
