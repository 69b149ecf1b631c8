//! Path-based filesystem over a pooled document store.
//!
//! Files created through the mount live in the open-file table until they
//! are flushed; everything else is answered from stored records. Each
//! operation checks a client out of the pool for its own duration.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::error::{FsError, FsResult};
use super::handles::{OpenFile, OpenFileTable};
use super::ops::{Caller, DirEntry, GridOps};
use crate::cadapter::{
    ChildQuery, ConnectionPool, Connector, FieldUpdate, FileRecord, Filter, PooledClient,
    Projection, StoreClient, Update,
};
use crate::chuck::ChunkLayout;
use crate::meta::owner::{gid_of, group_name, uid_of, user_name};
use crate::meta::xattr::{XattrReply, encode_name_list, fit_to_buffer, unnamespace_xattr};
use crate::meta::{
    DEFAULT_FILE_MODE, FileKind, FileStat, ROOT_MODE, S_IFDIR, S_IFLNK, SYNTHETIC_DIR_MODE,
    blocks_for, child_prefix, is_dir, is_root, regular_mode, to_store_key,
};

/// A pooled client checked out for one operation.
type Session<C> = PooledClient<<C as Connector>::Client>;

pub struct GridFs<C: Connector> {
    pool: ConnectionPool<C>,
    open_files: OpenFileTable,
    next_fh: AtomicU64,
}

impl<C: Connector> GridFs<C> {
    /// `layout` is the chunk size newly written files are stored with.
    pub fn new(pool: ConnectionPool<C>, layout: ChunkLayout) -> Self {
        Self {
            pool,
            open_files: OpenFileTable::new(layout),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn open_files(&self) -> &OpenFileTable {
        &self.open_files
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    fn next_handle(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    async fn find_by_name(client: &mut Session<C>, key: &str) -> FsResult<Option<FileRecord>> {
        Ok(client.find_one(&Filter::Filename(key.to_string())).await?)
    }

    /// Directory records exactly one level below `key`.
    async fn subdir_count(client: &mut Session<C>, key: &str) -> FsResult<u32> {
        let query = ChildQuery::children(&child_prefix(key))?;
        let children = client.query(&query, Projection::Mode).await?;
        Ok(children
            .iter()
            .filter(|r| r.mode.is_some_and(is_dir))
            .count() as u32)
    }

    async fn stat_record(
        client: &mut Session<C>,
        key: &str,
        record: &FileRecord,
    ) -> FsResult<FileStat> {
        let mode = record.mode.unwrap_or(DEFAULT_FILE_MODE);
        let time: SystemTime = record.upload_date.into();
        let (size, nlink) = match FileKind::of_mode(mode) {
            FileKind::Directory => (0, 2 + Self::subdir_count(client, key).await?),
            FileKind::Symlink => (record.target.as_ref().map_or(0, |t| t.len() as u64), 1),
            FileKind::Regular => (record.length, 1),
        };
        Ok(FileStat {
            mode,
            nlink,
            uid: record.owner.as_deref().and_then(uid_of).unwrap_or(0),
            gid: record.group.as_deref().and_then(gid_of).unwrap_or(0),
            size,
            blocks: blocks_for(size),
            mtime: time,
            ctime: time,
        })
    }

    /// Whether `key` names a directory only implied by longer keys.
    async fn has_descendants(&self, client: &mut Session<C>, key: &str) -> FsResult<bool> {
        let prefix = child_prefix(key);
        if !self.open_files.keys_under(&prefix).is_empty() {
            return Ok(true);
        }
        let query = ChildQuery::descendants(&prefix)?;
        Ok(!client.query(&query, Projection::Mode).await?.is_empty())
    }

    /// Resolve an xattr call to `(store key, stored attribute key)`.
    fn xattr_target<'a>(&self, path: &'a str, name: &'a str) -> FsResult<(&'a str, &'a str)> {
        if is_root(path) {
            return Err(FsError::NoAttribute);
        }
        let attr = unnamespace_xattr(name).ok_or(FsError::NoAttribute)?;
        let key = to_store_key(path);
        if self.open_files.contains(key) {
            return Err(FsError::NoAttribute);
        }
        Ok((key, attr))
    }

    async fn update_by_name(&self, key: &str, fields: FieldUpdate) -> FsResult<u64> {
        let mut client = self.pool.acquire().await?;
        let filter = Filter::Filename(key.to_string());
        Ok(client.update(&filter, &Update::Fields(fields)).await?)
    }

    async fn read_remote(
        client: &mut Session<C>,
        record: &FileRecord,
        offset: u64,
        size: usize,
    ) -> FsResult<Vec<u8>> {
        if record.chunk_size == 0 || size == 0 || offset >= record.length {
            return Ok(Vec::new());
        }
        let layout = ChunkLayout {
            chunk_size: record.chunk_size,
        };
        let total = record.chunk_count();
        let mut n = layout.chunk_index_of(offset);
        let mut skip = layout.within_chunk_offset(offset) as usize;
        let mut out = Vec::with_capacity(size.min(record.length as usize));
        while out.len() < size && n < total {
            let Some(chunk) = client.chunk(record.id, n).await? else {
                break;
            };
            // short final chunk
            if skip >= chunk.len() {
                break;
            }
            let available = chunk.len().saturating_sub(skip);
            let take = available.min(size - out.len());
            out.extend_from_slice(&chunk[skip..skip + take]);
            skip = 0;
            n += 1;
        }
        Ok(out)
    }

    async fn commit(
        key: &str,
        client: &mut Session<C>,
        file: &OpenFile,
    ) -> FsResult<FileRecord> {
        if Self::find_by_name(client, key).await?.is_some() {
            client.remove(key).await?;
        }
        let contents = file.buffer.to_vec();
        let stored = client
            .store_file(key, &contents, file.buffer.chunk_size())
            .await?;

        let owner = user_name(file.uid);
        let group = group_name(file.gid);
        if owner.is_none() || group.is_none() {
            debug!(key, uid = file.uid, gid = file.gid, "owner not resolvable, left unset");
        }
        let fields = FieldUpdate {
            mode: Some(regular_mode(file.mode)),
            owner,
            group,
            upload_date: file.mtime.map(DateTime::<Utc>::from),
            ..Default::default()
        };
        client
            .update(&Filter::Filename(key.to_string()), &Update::Fields(fields))
            .await?;
        Ok(stored)
    }
}

#[async_trait]
impl<C: Connector> GridOps for GridFs<C> {
    async fn getattr(&self, caller: Caller, path: &str) -> FsResult<FileStat> {
        if is_root(path) {
            return Ok(FileStat::directory(
                ROOT_MODE,
                2,
                caller.uid,
                caller.gid,
                SystemTime::now(),
            ));
        }
        let key = to_store_key(path);
        if let Some(entry) = self.open_files.lookup(key) {
            return Ok(entry.lock().await.stat());
        }

        let mut client = self.pool.acquire().await?;
        if let Some(record) = Self::find_by_name(&mut client, key).await? {
            return Self::stat_record(&mut client, key, &record).await;
        }
        if self.has_descendants(&mut client, key).await? {
            let nlink = 2 + Self::subdir_count(&mut client, key).await?;
            return Ok(FileStat::directory(
                SYNTHETIC_DIR_MODE,
                nlink,
                caller.uid,
                caller.gid,
                SystemTime::now(),
            ));
        }
        Err(FsError::NotFound)
    }

    async fn readlink(&self, path: &str, size: usize) -> FsResult<Vec<u8>> {
        let key = to_store_key(path);
        let mut client = self.pool.acquire().await?;
        let record = Self::find_by_name(&mut client, key)
            .await?
            .ok_or(FsError::NotFound)?;
        let target = record.target.ok_or(FsError::NotFound)?;

        let mut out = target.into_bytes();
        if out.len() >= size {
            out.truncate(size);
        } else {
            // NUL-terminated, padded to the caller's buffer
            out.resize(size, 0);
        }
        Ok(out)
    }

    async fn mkdir(&self, caller: Caller, path: &str, mode: u32) -> FsResult<()> {
        let key = to_store_key(path);
        let mut record = FileRecord::new(key);
        record.mode = Some(S_IFDIR | (mode & 0o7777));
        record.owner = user_name(caller.uid);
        record.group = group_name(caller.gid);
        let mut client = self.pool.acquire().await?;
        client.insert(record).await?;
        debug!(key, "created directory record");
        Ok(())
    }

    async fn mknod(&self, path: &str, mode: u32, _rdev: u32) -> FsResult<()> {
        debug!(path, mode, "mknod not supported");
        Err(FsError::Unsupported)
    }

    async fn unlink(&self, path: &str) -> FsResult<()> {
        let key = to_store_key(path);
        let mut client = self.pool.acquire().await?;
        let removed = client.remove(key).await?;
        debug!(key, removed, "unlink");
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        let key = to_store_key(path);
        let mut client = self.pool.acquire().await?;
        let removed = client.remove(key).await?;
        debug!(key, removed, "rmdir");
        Ok(())
    }

    async fn symlink(&self, caller: Caller, target: &str, path: &str) -> FsResult<()> {
        let key = to_store_key(path);
        let mut record = FileRecord::new(key);
        record.mode = Some(S_IFLNK | 0o777);
        record.target = Some(target.to_string());
        record.owner = user_name(caller.uid);
        record.group = group_name(caller.gid);
        let mut client = self.pool.acquire().await?;
        client.insert(record).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let (from_key, to_key) = (to_store_key(from), to_store_key(to));
        let mut client = self.pool.acquire().await?;
        let record = Self::find_by_name(&mut client, from_key)
            .await?
            .ok_or(FsError::NotFound)?;
        let fields = FieldUpdate {
            filename: Some(to_key.to_string()),
            ..Default::default()
        };
        client
            .update(&Filter::Id(record.id), &Update::Fields(fields))
            .await?;
        debug!(from = from_key, to = to_key, "renamed");
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let key = to_store_key(path);
        if let Some(entry) = self.open_files.lookup(key) {
            entry.lock().await.mode = mode;
        }
        let fields = FieldUpdate {
            mode: Some(mode),
            ..Default::default()
        };
        // best effort: the shadow copy above is what a later commit stamps
        if let Err(err) = self.update_by_name(key, fields).await {
            warn!(key, mode, error = %err, "stored mode not updated");
        }
        Ok(())
    }

    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let key = to_store_key(path);
        if let Some(entry) = self.open_files.lookup(key) {
            let mut file = entry.lock().await;
            if let Some(uid) = uid {
                file.uid = uid;
            }
            if let Some(gid) = gid {
                file.gid = gid;
            }
        }
        let fields = FieldUpdate {
            owner: uid.and_then(user_name),
            group: gid.and_then(group_name),
            ..Default::default()
        };
        if fields.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.update_by_name(key, fields).await {
            warn!(key, ?uid, ?gid, error = %err, "stored owner not updated");
        }
        Ok(())
    }

    async fn utimens(&self, path: &str, mtime: SystemTime) -> FsResult<()> {
        let key = to_store_key(path);
        if let Some(entry) = self.open_files.lookup(key) {
            entry.lock().await.mtime = Some(mtime);
        }
        let fields = FieldUpdate {
            upload_date: Some(DateTime::<Utc>::from(mtime)),
            ..Default::default()
        };
        self.update_by_name(key, fields).await?;
        Ok(())
    }

    async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let key = to_store_key(path);
        let current = match self.open_files.lookup(key) {
            Some(entry) => entry.lock().await.buffer.len(),
            None => {
                let mut client = self.pool.acquire().await?;
                Self::find_by_name(&mut client, key)
                    .await?
                    .ok_or(FsError::NotFound)?
                    .length
            }
        };
        if current == size {
            Ok(())
        } else {
            Err(FsError::Unsupported)
        }
    }

    async fn open(&self, path: &str, flags: u32) -> FsResult<u64> {
        if flags as i32 & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::AccessDenied);
        }
        let key = to_store_key(path);
        if self.open_files.contains(key) {
            return Ok(0);
        }
        let mut client = self.pool.acquire().await?;
        match Self::find_by_name(&mut client, key).await? {
            Some(_) => Ok(0),
            None => Err(FsError::NotFound),
        }
    }

    async fn read(&self, path: &str, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let key = to_store_key(path);
        if let Some(entry) = self.open_files.lookup(key) {
            let file = entry.lock().await;
            let len = file.buffer.len();
            if offset >= len {
                return Ok(Vec::new());
            }
            let want = size.min((len - offset) as usize);
            let mut buf = vec![0u8; want];
            let copied = file.buffer.read(offset, &mut buf);
            buf.truncate(copied);
            return Ok(buf);
        }

        let mut client = self.pool.acquire().await?;
        let record = Self::find_by_name(&mut client, key)
            .await?
            .ok_or(FsError::BadDescriptor)?;
        Self::read_remote(&mut client, &record, offset, size).await
    }

    async fn write(&self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        let key = to_store_key(path);
        let entry = self.open_files.lookup(key).ok_or(FsError::NotFound)?;
        let mut file = entry.lock().await;
        Ok(file.buffer.write(data, offset))
    }

    async fn flush(&self, path: &str, fh: u64) -> FsResult<()> {
        if fh == 0 {
            return Ok(());
        }
        let key = to_store_key(path);
        let entry = self.open_files.lookup(key).ok_or(FsError::NotFound)?;
        // held for the whole commit so concurrent writes land before or after it
        let mut file = entry.lock().await;
        if !file.buffer.is_dirty() {
            return Ok(());
        }

        let mut client = self.pool.acquire().await?;
        let record = Self::commit(key, &mut client, &file)
            .await
            .inspect_err(|err| {
                error!(key, error = %err, "commit interrupted, stored copy may be missing")
            })?;
        file.buffer.mark_flushed();
        info!(
            key,
            length = record.length,
            chunks = record.chunk_count(),
            "committed buffered file"
        );
        Ok(())
    }

    async fn release(&self, path: &str, fh: u64) -> FsResult<()> {
        if fh == 0 {
            return Ok(());
        }
        let key = to_store_key(path);
        if self.open_files.remove(key).is_some() {
            debug!(key, fh, "released buffered file");
        }
        Ok(())
    }

    async fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        let (key, attr) = self.xattr_target(path, name)?;
        // metadata values are stored as strings
        let value = std::str::from_utf8(value).map_err(|_| {
            debug!(key, attr, "xattr value is not UTF-8");
            FsError::InvalidArgument
        })?;
        let mut client = self.pool.acquire().await?;
        Self::find_by_name(&mut client, key)
            .await?
            .ok_or(FsError::NotFound)?;
        let mut fields = FieldUpdate::default();
        fields
            .set_metadata
            .insert(attr.to_string(), value.to_string());
        client
            .update(&Filter::Filename(key.to_string()), &Update::Fields(fields))
            .await?;
        Ok(())
    }

    async fn getxattr(&self, path: &str, name: &str, size: u32) -> FsResult<XattrReply> {
        let (key, attr) = self.xattr_target(path, name)?;
        let mut client = self.pool.acquire().await?;
        let record = Self::find_by_name(&mut client, key)
            .await?
            .ok_or(FsError::NotFound)?;
        let value = record.metadata.get(attr).ok_or(FsError::NoAttribute)?;
        fit_to_buffer(value.as_bytes().to_vec(), size).ok_or(FsError::Range)
    }

    async fn listxattr(&self, path: &str, size: u32) -> FsResult<XattrReply> {
        if is_root(path) {
            return Err(FsError::NoAttribute);
        }
        let key = to_store_key(path);
        if self.open_files.contains(key) {
            return Err(FsError::NoAttribute);
        }
        let mut client = self.pool.acquire().await?;
        let record = Self::find_by_name(&mut client, key)
            .await?
            .ok_or(FsError::NotFound)?;
        fit_to_buffer(encode_name_list(record.metadata.keys()), size).ok_or(FsError::Range)
    }

    async fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        let (key, attr) = self.xattr_target(path, name)?;
        let mut client = self.pool.acquire().await?;
        let record = Self::find_by_name(&mut client, key)
            .await?
            .ok_or(FsError::NotFound)?;
        if !record.metadata.contains_key(attr) {
            return Err(FsError::NoAttribute);
        }
        let fields = FieldUpdate {
            unset_metadata: vec![attr.to_string()],
            ..Default::default()
        };
        client
            .update(&Filter::Filename(key.to_string()), &Update::Fields(fields))
            .await?;
        Ok(())
    }

    async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let prefix = child_prefix(to_store_key(path));
        let mut entries = vec![
            DirEntry::new(".", FileKind::Directory),
            DirEntry::new("..", FileKind::Directory),
        ];
        let mut seen: HashSet<String> = HashSet::new();

        let records = {
            let mut client = self.pool.acquire().await?;
            let query = ChildQuery::descendants(&prefix)?;
            client.query(&query, Projection::Mode).await?
        };

        let mut previous: Option<&str> = None;
        for record in &records {
            if previous == Some(record.filename.as_str()) {
                continue;
            }
            previous = Some(record.filename.as_str());
            let rest = &record.filename[prefix.len()..];
            let (name, kind) = match rest.split_once('/') {
                // deeper entry: surface its first segment as a directory
                Some((first, _)) => (first, FileKind::Directory),
                None => (
                    rest,
                    FileKind::of_mode(record.mode.unwrap_or(DEFAULT_FILE_MODE)),
                ),
            };
            if !name.is_empty() && seen.insert(name.to_string()) {
                entries.push(DirEntry::new(name, kind));
            }
        }

        for key in self.open_files.keys_under(&prefix) {
            let rest = &key[prefix.len()..];
            let (name, kind) = match rest.split_once('/') {
                Some((first, _)) => (first, FileKind::Directory),
                None => (rest, FileKind::Regular),
            };
            if !name.is_empty() && seen.insert(name.to_string()) {
                entries.push(DirEntry::new(name, kind));
            }
        }
        Ok(entries)
    }

    async fn create(&self, caller: Caller, path: &str, mode: u32) -> FsResult<u64> {
        let key = to_store_key(path);
        self.open_files.create(key, caller.uid, caller.gid, mode);
        let fh = self.next_handle();
        debug!(key, fh, "created buffered file");
        Ok(fh)
    }
}
