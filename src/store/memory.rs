use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::{sort_newest_first, DocumentStore, Etag, Query, StoreError, StoredDocument};

/// In-process container keyed by document id.  Conditional writes are atomic
/// per document because the etag comparison happens under the shard lock.
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<String, StoredDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub(crate) fn load(&self, docs: Vec<StoredDocument>) {
        for doc in docs {
            self.docs.insert(doc.id.clone(), doc);
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<StoredDocument> {
        self.docs.get(id).map(|e| e.value().clone())
    }

    /// Resets `id` to `previous`, removing it when there was none.
    pub(crate) fn restore(&self, id: &str, previous: Option<StoredDocument>) {
        match previous {
            Some(doc) => {
                self.docs.insert(id.to_string(), doc);
            }
            None => {
                self.docs.remove(id);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<StoredDocument> {
        let mut all: Vec<StoredDocument> = self.docs.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let mut hits: Vec<StoredDocument> = self
            .docs
            .iter()
            .filter(|e| e.value().matches(query))
            .map(|e| e.value().clone())
            .collect();
        if matches!(query, Query::VisibleTo { .. }) {
            sort_newest_first(&mut hits);
        }
        Ok(hits)
    }

    async fn create(&self, body: Value) -> Result<StoredDocument, StoreError> {
        let doc = StoredDocument::from_body(body, Etag::fresh())?;
        match self.docs.entry(doc.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict { id: doc.id }),
            Entry::Vacant(slot) => {
                slot.insert(doc.clone());
                Ok(doc)
            }
        }
    }

    async fn upsert(
        &self,
        body: Value,
        if_match: Option<&Etag>,
    ) -> Result<StoredDocument, StoreError> {
        let doc = StoredDocument::from_body(body, Etag::fresh())?;
        match self.docs.entry(doc.id.clone()) {
            Entry::Occupied(mut slot) => {
                if let Some(expected) = if_match {
                    if slot.get().etag != *expected {
                        return Err(StoreError::PreconditionFailed { id: doc.id });
                    }
                }
                if slot.get().partition_key != doc.partition_key {
                    // ids are unique across partitions in this store
                    return Err(StoreError::Conflict { id: doc.id });
                }
                slot.insert(doc.clone());
                Ok(doc)
            }
            Entry::Vacant(slot) => {
                if if_match.is_some() {
                    return Err(StoreError::PreconditionFailed { id: doc.id });
                }
                slot.insert(doc.clone());
                Ok(doc)
            }
        }
    }

    async fn delete(
        &self,
        id: &str,
        partition_key: &str,
        if_match: Option<&Etag>,
    ) -> Result<StoredDocument, StoreError> {
        match self.docs.entry(id.to_string()) {
            Entry::Occupied(slot) => {
                if slot.get().partition_key != partition_key {
                    return Err(StoreError::NotFound { id: id.to_string() });
                }
                if let Some(expected) = if_match {
                    if slot.get().etag != *expected {
                        return Err(StoreError::PreconditionFailed { id: id.to_string() });
                    }
                }
                Ok(slot.remove())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
