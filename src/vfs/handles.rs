//! Files created through this mount and not yet released.
//!
//! Keyed by store key. Each entry owns the write-back buffer plus the
//! attributes a later commit stamps onto the stored record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::debug;

use crate::chuck::{ChunkLayout, ChunkedBuffer};
use crate::meta::{FileStat, blocks_for, regular_mode};

#[derive(Debug)]
pub struct OpenFile {
    pub buffer: ChunkedBuffer,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    /// Modification time set while buffered; committed as the upload date.
    pub mtime: Option<SystemTime>,
}

impl OpenFile {
    pub fn stat(&self) -> FileStat {
        let now = SystemTime::now();
        let size = self.buffer.len();
        FileStat {
            mode: regular_mode(self.mode),
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            size,
            blocks: blocks_for(size),
            mtime: self.mtime.unwrap_or(now),
            ctime: now,
        }
    }
}

/// Entries are shared so a commit can hold one file's lock across store
/// round trips without blocking the table.
pub type OpenFileRef = Arc<tokio::sync::Mutex<OpenFile>>;

#[derive(Debug, Default)]
pub struct OpenFileTable {
    layout: ChunkLayout,
    files: Mutex<HashMap<String, OpenFileRef>>,
}

impl OpenFileTable {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            layout,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Start buffering `key`. An existing entry for the same key is replaced
    /// and its uncommitted data discarded.
    pub fn create(&self, key: &str, uid: u32, gid: u32, mode: u32) -> OpenFileRef {
        let entry = Arc::new(tokio::sync::Mutex::new(OpenFile {
            buffer: ChunkedBuffer::new(self.layout),
            uid,
            gid,
            mode,
            mtime: None,
        }));
        if self
            .files()
            .insert(key.to_string(), Arc::clone(&entry))
            .is_some()
        {
            debug!(key, "replaced buffered file");
        }
        entry
    }

    pub fn lookup(&self, key: &str) -> Option<OpenFileRef> {
        self.files().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<OpenFileRef> {
        self.files().remove(key)
    }

    /// Keys strictly below `prefix`, sorted.
    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .files()
            .keys()
            .filter(|k| k.len() > prefix.len() && k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, OpenFileRef>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
