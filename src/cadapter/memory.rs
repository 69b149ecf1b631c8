//! In-process document store.
//!
//! Keeps the `files` collection in insertion order and chunks in a separate
//! map keyed by `(record id, chunk number)`, like the real collections. Cheap
//! to clone; clones share state, so tests can keep a handle for inspection
//! while a pool owns another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    ChildQuery, Connector, Credentials, FileRecord, Filter, GatewayError, GatewayResult,
    Projection, RecordId, StoreClient, Update, split_content,
};

#[derive(Default)]
struct Collections {
    files: Vec<FileRecord>,
    chunks: HashMap<(RecordId, u64), Bytes>,
    users: HashMap<String, String>,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    connects: AtomicU64,
    stores: AtomicU64,
    offline: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Collections>>,
    counters: Arc<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require these credentials from every new connection.
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.lock()
            .users
            .insert(username.to_string(), password.to_string());
        self
    }

    /// Refuse new connections, and fail calls on open ones, while `offline`
    /// is set.
    pub fn set_offline(&self, offline: bool) {
        self.counters.offline.store(offline, Ordering::SeqCst);
    }

    /// Connection attempts, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u64 {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Number of `store_file` calls served so far.
    pub fn store_count(&self) -> u64 {
        self.counters.stores.load(Ordering::SeqCst)
    }

    /// Snapshot of the `files` collection.
    pub fn records(&self) -> Vec<FileRecord> {
        self.lock().files.clone()
    }

    /// Lengths of the stored chunks of `id`, in chunk order.
    pub fn chunk_lengths(&self, id: RecordId) -> Vec<usize> {
        let inner = self.lock();
        let mut found: Vec<(u64, usize)> = inner
            .chunks
            .iter()
            .filter(|((owner, _), _)| *owner == id)
            .map(|((_, n), data)| (*n, data.len()))
            .collect();
        found.sort_unstable();
        found.into_iter().map(|(_, len)| len).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MemoryClient {
    store: MemoryStore,
}

#[async_trait]
impl Connector for MemoryStore {
    type Client = MemoryClient;

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn connect(&self, credentials: Option<&Credentials>) -> GatewayResult<MemoryClient> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        if self.counters.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Connect(self.endpoint()));
        }
        if let Some(creds) = credentials {
            let inner = self.lock();
            if inner.users.get(&creds.username) != Some(&creds.password) {
                return Err(GatewayError::Auth(format!(
                    "user {} rejected",
                    creds.username
                )));
            }
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryClient {
            store: self.clone(),
        })
    }
}

impl MemoryClient {
    fn check_online(&self) -> GatewayResult<()> {
        if self.store.counters.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Backend("connection lost".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn find_one(&mut self, filter: &Filter) -> GatewayResult<Option<FileRecord>> {
        self.check_online()?;
        let inner = self.store.lock();
        Ok(inner.files.iter().find(|r| filter.matches(r)).cloned())
    }

    async fn insert(&mut self, record: FileRecord) -> GatewayResult<()> {
        self.check_online()?;
        self.store.lock().files.push(record);
        Ok(())
    }

    async fn update(&mut self, filter: &Filter, update: &Update) -> GatewayResult<u64> {
        self.check_online()?;
        let mut inner = self.store.lock();
        match inner.files.iter_mut().find(|r| filter.matches(r)) {
            Some(record) => {
                update.apply(record);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn remove(&mut self, filename: &str) -> GatewayResult<u64> {
        self.check_online()?;
        let mut inner = self.store.lock();
        let doomed: Vec<RecordId> = inner
            .files
            .iter()
            .filter(|r| r.filename == filename)
            .map(|r| r.id)
            .collect();
        inner.files.retain(|r| r.filename != filename);
        inner.chunks.retain(|(id, _), _| !doomed.contains(id));
        Ok(doomed.len() as u64)
    }

    async fn chunk(&mut self, id: RecordId, n: u64) -> GatewayResult<Option<Bytes>> {
        self.check_online()?;
        Ok(self.store.lock().chunks.get(&(id, n)).cloned())
    }

    async fn store_file(
        &mut self,
        filename: &str,
        data: &[u8],
        chunk_size: u64,
    ) -> GatewayResult<FileRecord> {
        self.check_online()?;
        let record = FileRecord::for_content(filename, data, chunk_size);
        let mut inner = self.store.lock();
        for (n, part) in split_content(data, chunk_size).into_iter().enumerate() {
            inner.chunks.insert((record.id, n as u64), part);
        }
        inner.files.push(record.clone());
        self.store.counters.stores.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn list(&mut self) -> GatewayResult<Vec<FileRecord>> {
        self.check_online()?;
        Ok(self.store.lock().files.clone())
    }

    async fn query(
        &mut self,
        query: &ChildQuery,
        projection: Projection,
    ) -> GatewayResult<Vec<FileRecord>> {
        self.check_online()?;
        let inner = self.store.lock();
        Ok(inner
            .files
            .iter()
            .filter(|r| query.matches(&r.filename))
            .cloned()
            .map(|r| r.project(projection))
            .collect())
    }
}
