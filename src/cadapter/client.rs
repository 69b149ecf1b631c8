//! Bounded connection pool
//!
//! At most `capacity` clients are checked out at once. A checked-out client
//! comes back to the idle list when its [`PooledClient`] guard drops, on
//! success and error paths alike, unless its session failed. Connection
//! failures are not retried.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::{
    ChildQuery, Connector, Credentials, FileRecord, Filter, GatewayError, GatewayResult,
    Projection, RecordId, StoreClient, Update,
};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 8 }
    }
}

pub struct ConnectionPool<C: Connector> {
    connector: C,
    credentials: Option<Credentials>,
    idle: Arc<Mutex<Vec<C::Client>>>,
    permits: Arc<Semaphore>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, credentials: Option<Credentials>, config: PoolConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            connector,
            credentials,
            idle: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Check out a client, waiting while the pool is exhausted. Reuses an
    /// idle client when one exists, otherwise opens and authenticates a new one.
    pub async fn acquire(&self) -> GatewayResult<PooledClient<C::Client>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Connect("connection pool closed".to_string()))?;

        let reused = lock_idle(&self.idle).pop();
        let client = match reused {
            Some(client) => client,
            None => self.connect().await?,
        };

        Ok(PooledClient {
            client: Some(client),
            broken: false,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Open and authenticate one connection. Failures are returned as-is;
    /// the caller's operation fails with them.
    async fn connect(&self) -> GatewayResult<C::Client> {
        let endpoint = self.connector.endpoint();
        debug!(%endpoint, "opening store connection");
        self.connector
            .connect(self.credentials.as_ref())
            .await
            .inspect_err(|err| warn!(%endpoint, error = %err, "store connection failed"))
    }

    /// Clients currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        lock_idle(&self.idle).len()
    }

    /// Clients that may still be checked out without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

fn lock_idle<T>(idle: &Mutex<Vec<T>>) -> MutexGuard<'_, Vec<T>> {
    idle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive use of one pooled client.
///
/// Calls made through the guard's own [`StoreClient`] impl watch for
/// session-level failures; a client that hit one is closed on drop instead
/// of going back to the idle list.
pub struct PooledClient<T> {
    client: Option<T>,
    broken: bool,
    idle: Arc<Mutex<Vec<T>>>,
    _permit: OwnedSemaphorePermit,
}

impl<T> PooledClient<T> {
    /// Whether this client is closed on drop rather than reused.
    pub fn is_discarded(&self) -> bool {
        self.broken
    }

    fn observe<R>(&mut self, res: GatewayResult<R>) -> GatewayResult<R> {
        if let Err(err) = &res {
            if err.is_session_failure() {
                debug!(error = %err, "discarding pooled client");
                self.broken = true;
            }
        }
        res
    }
}

impl<T> Deref for PooledClient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.client {
            Some(client) => client,
            None => unreachable!("pooled client used after release"),
        }
    }
}

impl<T> DerefMut for PooledClient<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.client {
            Some(client) => client,
            None => unreachable!("pooled client used after release"),
        }
    }
}

impl<T> Drop for PooledClient<T> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if !self.broken {
            lock_idle(&self.idle).push(client);
        }
        // permit is released after this, once the client is parked
    }
}

#[async_trait]
impl<T: StoreClient> StoreClient for PooledClient<T> {
    async fn find_one(&mut self, filter: &Filter) -> GatewayResult<Option<FileRecord>> {
        let res = (**self).find_one(filter).await;
        self.observe(res)
    }

    async fn insert(&mut self, record: FileRecord) -> GatewayResult<()> {
        let res = (**self).insert(record).await;
        self.observe(res)
    }

    async fn update(&mut self, filter: &Filter, update: &Update) -> GatewayResult<u64> {
        let res = (**self).update(filter, update).await;
        self.observe(res)
    }

    async fn remove(&mut self, filename: &str) -> GatewayResult<u64> {
        let res = (**self).remove(filename).await;
        self.observe(res)
    }

    async fn chunk(&mut self, id: RecordId, n: u64) -> GatewayResult<Option<Bytes>> {
        let res = (**self).chunk(id, n).await;
        self.observe(res)
    }

    async fn store_file(
        &mut self,
        filename: &str,
        data: &[u8],
        chunk_size: u64,
    ) -> GatewayResult<FileRecord> {
        let res = (**self).store_file(filename, data, chunk_size).await;
        self.observe(res)
    }

    async fn list(&mut self) -> GatewayResult<Vec<FileRecord>> {
        let res = (**self).list().await;
        self.observe(res)
    }

    async fn query(
        &mut self,
        query: &ChildQuery,
        projection: Projection,
    ) -> GatewayResult<Vec<FileRecord>> {
        let res = (**self).query(query, projection).await;
        self.observe(res)
    }
}
