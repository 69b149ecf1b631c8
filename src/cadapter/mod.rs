//! Document-store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: bounded connection pool handing out authenticated clients
//! - `memory`: in-process store used by tests and embedding
//! - `localfs`: directory-backed store (JSON records, one file per chunk)
//!
//! The filesystem layer only talks to the store through [`Connector`] and
//! [`StoreClient`]. A file is a record in the `files` collection plus its
//! ordered chunks; the record's `filename` is the slash-free-prefixed path.
pub mod client;
pub mod localfs;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::chuck::ChunkLayout;

pub use client::{ConnectionPool, PooledClient};
pub use localfs::LocalStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot connect to {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid query pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl GatewayError {
    /// Whether the session that produced this error should be closed.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Connect(_)
                | GatewayError::Auth(_)
                | GatewayError::Io(_)
                | GatewayError::Backend(_)
        )
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Store-assigned identity of a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One entry of the `files` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub filename: String,
    #[serde(default)]
    pub length: u64,
    #[serde(rename = "chunkSize", default)]
    pub chunk_size: u64,
    #[serde(rename = "uploadDate")]
    pub upload_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl FileRecord {
    /// Empty record stamped with a fresh id and the current time.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            filename: filename.into(),
            length: 0,
            chunk_size: 0,
            upload_date: Utc::now(),
            md5: None,
            owner: None,
            group: None,
            mode: None,
            target: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Record describing `data` stored under `filename` in `chunk_size` pieces.
    pub fn for_content(filename: impl Into<String>, data: &[u8], chunk_size: u64) -> Self {
        let mut record = Self::new(filename);
        record.length = data.len() as u64;
        record.chunk_size = chunk_size;
        record.md5 = Some(format!("{:x}", md5::compute(data)));
        record
    }

    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            0
        } else {
            ChunkLayout::new(self.chunk_size).chunks_for(self.length)
        }
    }

    /// Drop everything a projection does not ask for.
    pub fn project(self, projection: Projection) -> Self {
        match projection {
            Projection::Full => self,
            Projection::Mode => Self {
                id: self.id,
                filename: self.filename,
                length: 0,
                chunk_size: 0,
                upload_date: self.upload_date,
                md5: None,
                owner: None,
                group: None,
                mode: self.mode,
                target: None,
                metadata: BTreeMap::new(),
            },
        }
    }
}

/// Split `data` into the chunk payloads that [`FileRecord::for_content`] describes.
pub fn split_content(data: &[u8], chunk_size: u64) -> Vec<Bytes> {
    if chunk_size == 0 {
        return Vec::new();
    }
    data.chunks(chunk_size as usize)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Record selector for single-record operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Filename(String),
    Id(RecordId),
}

impl Filter {
    pub fn matches(&self, record: &FileRecord) -> bool {
        match self {
            Filter::Filename(name) => record.filename == *name,
            Filter::Id(id) => record.id == *id,
        }
    }
}

/// Field-level changes applied to a single record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    pub filename: Option<String>,
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub upload_date: Option<DateTime<Utc>>,
    pub set_metadata: BTreeMap<String, String>,
    pub unset_metadata: Vec<String>,
}

impl FieldUpdate {
    pub fn is_empty(&self) -> bool {
        self.filename.is_none()
            && self.mode.is_none()
            && self.owner.is_none()
            && self.group.is_none()
            && self.upload_date.is_none()
            && self.set_metadata.is_empty()
            && self.unset_metadata.is_empty()
    }

    pub fn apply(&self, record: &mut FileRecord) {
        if let Some(name) = &self.filename {
            record.filename = name.clone();
        }
        if let Some(mode) = self.mode {
            record.mode = Some(mode);
        }
        if let Some(owner) = &self.owner {
            record.owner = Some(owner.clone());
        }
        if let Some(group) = &self.group {
            record.group = Some(group.clone());
        }
        if let Some(date) = self.upload_date {
            record.upload_date = date;
        }
        for (key, value) in &self.set_metadata {
            record.metadata.insert(key.clone(), value.clone());
        }
        for key in &self.unset_metadata {
            record.metadata.remove(key);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace every field except the id.
    Replace(FileRecord),
    Fields(FieldUpdate),
}

impl Update {
    pub fn apply(&self, record: &mut FileRecord) {
        match self {
            Update::Replace(next) => {
                let id = record.id;
                *record = next.clone();
                record.id = id;
            }
            Update::Fields(fields) => fields.apply(record),
        }
    }
}

/// Which fields a multi-record query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Full,
    /// Identity, filename, upload date and mode only.
    Mode,
}

/// Filename query over the `files` collection: a literal prefix for the
/// index-friendly part plus a regex for the exact shape.
#[derive(Debug, Clone)]
pub struct ChildQuery {
    prefix: String,
    pattern: Regex,
}

impl ChildQuery {
    /// Names exactly one path segment below `prefix`.
    pub fn children(prefix: &str) -> GatewayResult<Self> {
        let pattern = Regex::new(&format!("^{}[^/]+$", regex::escape(prefix)))?;
        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    /// Any name strictly below `prefix`.
    pub fn descendants(prefix: &str) -> GatewayResult<Self> {
        let pattern = Regex::new(&format!("^{}.+$", regex::escape(prefix)))?;
        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    pub fn matches(&self, filename: &str) -> bool {
        filename.starts_with(&self.prefix) && self.pattern.is_match(filename)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An open, authenticated session against the store.
#[async_trait]
pub trait StoreClient: Send {
    async fn find_one(&mut self, filter: &Filter) -> GatewayResult<Option<FileRecord>>;

    async fn insert(&mut self, record: FileRecord) -> GatewayResult<()>;

    /// Apply `update` to the first matching record. Returns the match count.
    async fn update(&mut self, filter: &Filter, update: &Update) -> GatewayResult<u64>;

    /// Delete every record named `filename` together with its chunks.
    async fn remove(&mut self, filename: &str) -> GatewayResult<u64>;

    /// Chunk `n` of record `id`, if stored.
    async fn chunk(&mut self, id: RecordId, n: u64) -> GatewayResult<Option<Bytes>>;

    /// Chunk `data`, write the chunks and a fresh record for them.
    async fn store_file(
        &mut self,
        filename: &str,
        data: &[u8],
        chunk_size: u64,
    ) -> GatewayResult<FileRecord>;

    /// Every record, in store order.
    async fn list(&mut self) -> GatewayResult<Vec<FileRecord>>;

    async fn query(
        &mut self,
        query: &ChildQuery,
        projection: Projection,
    ) -> GatewayResult<Vec<FileRecord>>;
}

/// Opens new sessions; credentials are checked once per session.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: StoreClient + 'static;

    fn endpoint(&self) -> String;

    async fn connect(&self, credentials: Option<&Credentials>) -> GatewayResult<Self::Client>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_query_single_segment() {
        let q = ChildQuery::children("docs/").unwrap();
        assert!(q.matches("docs/a.txt"));
        assert!(!q.matches("docs/sub/a.txt"));
        assert!(!q.matches("docs/"));
        assert!(!q.matches("other/a.txt"));

        let root = ChildQuery::children("").unwrap();
        assert!(root.matches("x"));
        assert!(!root.matches("a/y"));
    }

    #[test]
    fn test_query_escapes_prefix() {
        let q = ChildQuery::children("a.b/").unwrap();
        assert!(q.matches("a.b/c"));
        assert!(!q.matches("aXb/c"));
        let d = ChildQuery::descendants("a+/").unwrap();
        assert!(d.matches("a+/x/y"));
    }

    #[test]
    fn test_field_update_apply() {
        let mut record = FileRecord::new("a");
        record.metadata.insert("old".into(), "1".into());
        let update = FieldUpdate {
            filename: Some("b".into()),
            mode: Some(0o100600),
            set_metadata: BTreeMap::from([("k".into(), "v".into())]),
            unset_metadata: vec!["old".into()],
            ..Default::default()
        };
        let id = record.id;
        Update::Fields(update).apply(&mut record);
        assert_eq!(record.id, id);
        assert_eq!(record.filename, "b");
        assert_eq!(record.mode, Some(0o100600));
        assert_eq!(record.metadata.get("k").map(String::as_str), Some("v"));
        assert!(!record.metadata.contains_key("old"));
    }

    #[test]
    fn test_record_for_content() {
        let record = FileRecord::for_content("f", b"hello", 2);
        assert_eq!(record.length, 5);
        assert_eq!(record.chunk_count(), 3);
        assert_eq!(
            record.md5.as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        let parts = split_content(b"hello", 2);
        assert_eq!(parts.len(), 3);
        assert_eq!(&parts[2][..], b"o");
    }

    #[test]
    fn test_record_json_field_names() {
        let mut record = FileRecord::for_content("dir/f", b"x", 4);
        record.mode = Some(0o100644);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("_id").is_some());
        assert_eq!(json["chunkSize"], 4);
        assert!(json.get("uploadDate").is_some());
        assert!(json.get("target").is_none());
        let back: FileRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
