//! Path-based filesystem operations.
//!
//! Paths are absolute mount paths (`/`, `/a/b`). Every call is independent;
//! identity comes from the [`Caller`] of the current request.

use std::time::SystemTime;

use async_trait::async_trait;

use super::error::FsResult;
use crate::meta::xattr::XattrReply;
use crate::meta::{FileKind, FileStat};

/// Credentials of the process issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[async_trait]
pub trait GridOps: Send + Sync + 'static {
    async fn getattr(&self, caller: Caller, path: &str) -> FsResult<FileStat>;

    /// Target of a symlink, shaped for a caller buffer of `size` bytes.
    async fn readlink(&self, path: &str, size: usize) -> FsResult<Vec<u8>>;

    async fn mkdir(&self, caller: Caller, path: &str, mode: u32) -> FsResult<()>;

    async fn mknod(&self, path: &str, mode: u32, rdev: u32) -> FsResult<()>;

    async fn unlink(&self, path: &str) -> FsResult<()>;

    async fn rmdir(&self, path: &str) -> FsResult<()>;

    async fn symlink(&self, caller: Caller, target: &str, path: &str) -> FsResult<()>;

    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()>;

    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;

    async fn utimens(&self, path: &str, mtime: SystemTime) -> FsResult<()>;

    async fn truncate(&self, path: &str, size: u64) -> FsResult<()>;

    /// Open for reading. Returns the file handle.
    async fn open(&self, path: &str, flags: u32) -> FsResult<u64>;

    async fn read(&self, path: &str, offset: u64, size: usize) -> FsResult<Vec<u8>>;

    async fn write(&self, path: &str, data: &[u8], offset: u64) -> FsResult<usize>;

    async fn flush(&self, path: &str, fh: u64) -> FsResult<()>;

    async fn release(&self, path: &str, fh: u64) -> FsResult<()>;

    async fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()>;

    async fn getxattr(&self, path: &str, name: &str, size: u32) -> FsResult<XattrReply>;

    async fn listxattr(&self, path: &str, size: u32) -> FsResult<XattrReply>;

    async fn removexattr(&self, path: &str, name: &str) -> FsResult<()>;

    /// Entries of a directory, `.` and `..` first.
    async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>>;

    /// Create a regular file buffered in memory. Returns the file handle.
    async fn create(&self, caller: Caller, path: &str, mode: u32) -> FsResult<u64>;
}
