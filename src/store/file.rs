use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{DocumentStore, Etag, MemoryStore, Query, StoreError, StoredDocument};

/// A `MemoryStore` persisted as a JSON array snapshot.  The snapshot is
/// rewritten (temp file + rename) after every mutation; a mutation whose
/// snapshot cannot be written is rolled back in memory.
pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens the snapshot at `path`, starting empty if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let inner = MemoryStore::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                let raw: Vec<Value> = serde_json::from_slice(&bytes)?;
                let docs = raw
                    .into_iter()
                    .map(StoredDocument::from_snapshot)
                    .collect::<Result<Vec<_>, _>>()?;
                tracing::info!(path = %path.display(), documents = docs.len(), "loaded document snapshot");
                inner.load(docs);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no document snapshot yet, starting empty");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            inner,
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Caller holds `write_lock`.
    async fn persist(&self) -> Result<(), StoreError> {
        let snapshot: Vec<Value> = self
            .inner
            .snapshot()
            .iter()
            .map(StoredDocument::to_snapshot)
            .collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Persists, or puts `previous` back under `id` when the snapshot fails.
    async fn persist_or_restore(
        &self,
        id: &str,
        previous: Option<StoredDocument>,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.persist().await {
            tracing::warn!(path = %self.path.display(), id = %id, error = %e, "snapshot write failed, change rolled back");
            self.inner.restore(id, previous);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.query(query).await
    }

    async fn create(&self, body: Value) -> Result<StoredDocument, StoreError> {
        let _guard = self.write_lock.lock().await;
        let doc = self.inner.create(body).await?;
        self.persist_or_restore(&doc.id, None).await?;
        Ok(doc)
    }

    async fn upsert(
        &self,
        body: Value,
        if_match: Option<&Etag>,
    ) -> Result<StoredDocument, StoreError> {
        let _guard = self.write_lock.lock().await;
        let previous = body
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|id| self.inner.get(id));
        let doc = self.inner.upsert(body, if_match).await?;
        self.persist_or_restore(&doc.id, previous).await?;
        Ok(doc)
    }

    async fn delete(
        &self,
        id: &str,
        partition_key: &str,
        if_match: Option<&Etag>,
    ) -> Result<StoredDocument, StoreError> {
        let _guard = self.write_lock.lock().await;
        let doc = self.inner.delete(id, partition_key, if_match).await?;
        self.persist_or_restore(id, Some(doc.clone())).await?;
        Ok(doc)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
