//! Directory-backed document store.
//!
//! Layout under `<data_dir>/<db>/`:
//! - `<prefix>.files/<id>.json`: one JSON document per file record
//! - `<prefix>.chunks/<id>/<n>`: raw bytes of chunk `n`
//!
//! Records are read back in upload order, which stands in for the natural
//! order of the real collection.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use super::{
    ChildQuery, Connector, Credentials, FileRecord, Filter, GatewayError, GatewayResult,
    Projection, RecordId, StoreClient, Update, split_content,
};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    prefix: String,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(data_dir: P, db: &str, prefix: &str) -> Self {
        Self {
            root: data_dir.as_ref().join(db),
            prefix: prefix.to_string(),
        }
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join(format!("{}.files", self.prefix))
    }

    fn record_path(&self, id: RecordId) -> PathBuf {
        self.files_dir().join(format!("{id}.json"))
    }

    fn chunk_dir(&self, id: RecordId) -> PathBuf {
        self.root.join(format!("{}.chunks", self.prefix)).join(id.to_string())
    }
}

pub struct LocalClient {
    store: LocalStore,
}

#[async_trait]
impl Connector for LocalStore {
    type Client = LocalClient;

    fn endpoint(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn connect(&self, credentials: Option<&Credentials>) -> GatewayResult<LocalClient> {
        if let Some(creds) = credentials {
            return Err(GatewayError::Auth(format!(
                "local store does not authenticate users (got {})",
                creds.username
            )));
        }
        fs::create_dir_all(self.files_dir()).await.map_err(|e| {
            GatewayError::Connect(format!("{}: {e}", self.endpoint()))
        })?;
        Ok(LocalClient {
            store: self.clone(),
        })
    }
}

impl LocalClient {
    async fn load_all(&self) -> GatewayResult<Vec<FileRecord>> {
        let mut records = Vec::new();
        let mut dir = fs::read_dir(self.store.files_dir()).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read(&path).await?;
            records.push(serde_json::from_slice::<FileRecord>(&raw)?);
        }
        records.sort_by(|a, b| {
            a.upload_date
                .cmp(&b.upload_date)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(records)
    }

    async fn write_record(&self, record: &FileRecord) -> GatewayResult<()> {
        let path = self.store.record_path(record.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record)?;
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(&body).await?;
        f.flush().await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete_record(&self, id: RecordId) -> GatewayResult<()> {
        ignore_missing(fs::remove_file(self.store.record_path(id)).await)?;
        ignore_missing(fs::remove_dir_all(self.store.chunk_dir(id)).await)?;
        Ok(())
    }
}

fn ignore_missing(res: std::io::Result<()>) -> std::io::Result<()> {
    match res {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl StoreClient for LocalClient {
    async fn find_one(&mut self, filter: &Filter) -> GatewayResult<Option<FileRecord>> {
        if let Filter::Id(id) = filter {
            return match fs::read(self.store.record_path(*id)).await {
                Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            };
        }
        Ok(self.load_all().await?.into_iter().find(|r| filter.matches(r)))
    }

    async fn insert(&mut self, record: FileRecord) -> GatewayResult<()> {
        self.write_record(&record).await
    }

    async fn update(&mut self, filter: &Filter, update: &Update) -> GatewayResult<u64> {
        let Some(mut record) = self.find_one(filter).await? else {
            return Ok(0);
        };
        update.apply(&mut record);
        self.write_record(&record).await?;
        Ok(1)
    }

    async fn remove(&mut self, filename: &str) -> GatewayResult<u64> {
        let mut removed = 0;
        for record in self.load_all().await? {
            if record.filename == filename {
                self.delete_record(record.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn chunk(&mut self, id: RecordId, n: u64) -> GatewayResult<Option<Bytes>> {
        match fs::read(self.store.chunk_dir(id).join(n.to_string())).await {
            Ok(buf) => Ok(Some(Bytes::from(buf))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store_file(
        &mut self,
        filename: &str,
        data: &[u8],
        chunk_size: u64,
    ) -> GatewayResult<FileRecord> {
        let record = FileRecord::for_content(filename, data, chunk_size);
        let dir = self.store.chunk_dir(record.id);
        fs::create_dir_all(&dir).await?;
        for (n, part) in split_content(data, chunk_size).iter().enumerate() {
            fs::write(dir.join(n.to_string()), part).await?;
        }
        // record last: a crash mid-upload leaves orphan chunks, never a short file
        self.write_record(&record).await?;
        debug!(filename, id = %record.id, length = record.length, "stored file");
        Ok(record)
    }

    async fn list(&mut self) -> GatewayResult<Vec<FileRecord>> {
        self.load_all().await
    }

    async fn query(
        &mut self,
        query: &ChildQuery,
        projection: Projection,
    ) -> GatewayResult<Vec<FileRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| query.matches(&r.filename))
            .map(|r| r.project(projection))
            .collect())
    }
}
