//! Metadata mapping between POSIX and stored records.
//!
//! Submodules:
//! - `owner`: uid/gid to user/group names and back
//! - `xattr`: extended-attribute namespacing and size probing
//!
//! Paths: the mount sees `/a/b`, the store keeps `a/b`. The root maps to the
//! empty key and children of a key `k` share the prefix `k/`.
pub mod owner;
pub mod xattr;

use std::time::SystemTime;

pub const S_IFMT: u32 = libc::S_IFMT as u32;
pub const S_IFREG: u32 = libc::S_IFREG as u32;
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub const S_IFLNK: u32 = libc::S_IFLNK as u32;

/// Mode assumed for records stored without one.
pub const DEFAULT_FILE_MODE: u32 = S_IFREG | 0o644;
/// Mode of directories implied only by their descendants.
pub const SYNTHETIC_DIR_MODE: u32 = S_IFDIR | 0o755;
pub const ROOT_MODE: u32 = S_IFDIR | 0o777;

pub fn is_root(path: &str) -> bool {
    path == "/"
}

/// Store key of a mount path: exactly one leading slash removed.
pub fn to_store_key(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Prefix shared by the keys of a directory's children.
pub fn child_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

impl FileKind {
    pub fn of_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::Regular,
        }
    }
}

pub fn is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

/// Force the regular-file type onto `mode`, keeping its permission bits.
pub fn regular_mode(mode: u32) -> u32 {
    S_IFREG | (mode & !S_IFMT)
}

/// Replace the permission bits of `current`, keeping its type.
pub fn with_permissions(current: u32, perm: u32) -> u32 {
    (current & S_IFMT) | (perm & !S_IFMT)
}

/// Attributes reported for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileStat {
    pub fn directory(mode: u32, nlink: u32, uid: u32, gid: u32, time: SystemTime) -> Self {
        Self {
            mode,
            nlink,
            uid,
            gid,
            size: 0,
            blocks: 0,
            mtime: time,
            ctime: time,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::of_mode(self.mode)
    }

    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

/// 512-byte blocks covering `size` bytes.
pub fn blocks_for(size: u64) -> u64 {
    size.div_ceil(512)
}
