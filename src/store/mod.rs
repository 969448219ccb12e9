//! Document store abstraction.
//!
//! All record kinds share one container.  Documents are plain JSON objects
//! carrying `id`, `type` and `userId` (the partition key); the store assigns an
//! opaque `_etag` on every write so callers can make their writes conditional
//! on the revision they last observed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::DocumentKind;

pub mod file;
pub mod memory;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;

/// Opaque revision marker assigned by the store on each write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(pub String);

impl Etag {
    pub(crate) fn fresh() -> Self {
        Etag(format!("\"{}\"", uuid::Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for Etag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub partition_key: String,
    pub kind: DocumentKind,
    pub etag: Etag,
    pub body: Value,
}

impl StoredDocument {
    /// Validates the envelope fields of a JSON document.
    pub fn from_body(body: Value, etag: Etag) -> Result<Self, StoreError> {
        let obj = body
            .as_object()
            .ok_or_else(|| StoreError::InvalidDocument("document must be a JSON object".into()))?;
        let id = required_str(obj, "id")?;
        let partition_key = required_str(obj, "userId")?;
        let kind_raw = required_str(obj, "type")?;
        let kind = DocumentKind::parse(&kind_raw)
            .ok_or_else(|| StoreError::InvalidDocument(format!("unknown type '{}'", kind_raw)))?;
        Ok(Self {
            id,
            partition_key,
            kind,
            etag,
            body,
        })
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.body
            .get("createdAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn is_published(&self) -> bool {
        self.body
            .get("isPublished")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn shared_with(&self, principal: &str) -> bool {
        self.body
            .get("shareWith")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter().any(|sw| {
                    sw.get("userPrincipalName").and_then(|v| v.as_str()) == Some(principal)
                })
            })
            .unwrap_or(false)
    }

    /// Evaluates a query predicate against this document.
    pub fn matches(&self, query: &Query) -> bool {
        match query {
            Query::ById { kind, id } => self.kind == *kind && self.id == *id,
            Query::VisibleTo {
                kind,
                user_id,
                principal,
            } => {
                self.kind == *kind
                    && (self.partition_key == *user_id
                        || (self.is_published() && self.shared_with(principal)))
            }
        }
    }

    /// The body with the store's `_etag` embedded, as written to snapshots.
    pub(crate) fn to_snapshot(&self) -> Value {
        let mut body = self.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("_etag".into(), Value::String(self.etag.0.clone()));
        }
        body
    }

    pub(crate) fn from_snapshot(mut body: Value) -> Result<Self, StoreError> {
        let etag = body
            .as_object_mut()
            .and_then(|obj| obj.remove("_etag"))
            .and_then(|v| v.as_str().map(|s| Etag(s.to_string())))
            .unwrap_or_else(Etag::fresh);
        Self::from_body(body, etag)
    }
}

fn required_str(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String, StoreError> {
    match obj.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(StoreError::InvalidDocument(format!(
            "missing or empty '{}'",
            field
        ))),
    }
}

/// Queries the store evaluates.  Results of `VisibleTo` are ordered by
/// `createdAt` descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    ById {
        kind: DocumentKind,
        id: String,
    },
    /// `userId == user_id OR (isPublished AND principal IN shareWith[*].userPrincipalName)`
    VisibleTo {
        kind: DocumentKind,
        user_id: String,
        principal: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {id} not found")]
    NotFound { id: String },
    #[error("document {id} already exists")]
    Conflict { id: String },
    #[error("document {id} was modified concurrently")]
    PreconditionFailed { id: String },
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    /// Inserts a new document; fails with `Conflict` if the id exists.
    async fn create(&self, body: Value) -> Result<StoredDocument, StoreError>;

    /// Inserts or replaces.  With `if_match`, the write only happens when the
    /// stored etag equals it.
    async fn upsert(&self, body: Value, if_match: Option<&Etag>)
        -> Result<StoredDocument, StoreError>;

    /// Removes a document by id and partition key, returning what was removed.
    async fn delete(
        &self,
        id: &str,
        partition_key: &str,
        if_match: Option<&Etag>,
    ) -> Result<StoredDocument, StoreError>;

    /// Short label reported by `/healthz`.
    fn backend_name(&self) -> &'static str;
}

/// Sorts newest first; documents without a parseable `createdAt` go last.
pub(crate) fn sort_newest_first(docs: &mut [StoredDocument]) {
    docs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}
