//! Server actions for personas, extensions and chat threads.
//!
//! Reads go through the visibility predicate (owner, or published and shared
//! with the caller).  Writes re-fetch the record, require admin or ownership,
//! and then write conditionally on the etag observed during that check so a
//! concurrent change between check and write is rejected instead of lost.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::identity::CurrentUser;
use crate::models::{DocumentKind, Shareable};
use crate::response::ServiceError;
use crate::store::{DocumentStore, Etag, Query, StoreError, StoredDocument};
use crate::vault::SecretVault;

pub mod chat;
pub mod extension;
pub mod invoke;
pub mod persona;

pub use self::chat::ChatService;
pub use self::extension::ExtensionService;
pub use self::invoke::{FunctionInvoker, Invocation};
pub use self::persona::PersonaService;

/// Handles shared by every service.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub vault: Arc<dyn SecretVault>,
    pub audit: AuditSink,
    /// When set, only admins may change the publish flag.
    pub publish_requires_admin: bool,
}

impl Backends {
    pub(crate) fn may_publish(&self, user: &CurrentUser) -> bool {
        user.is_admin || !self.publish_requires_admin
    }

    pub(crate) fn audit(&self, action: AuditAction, kind: DocumentKind, id: &str, user: &CurrentUser) {
        self.audit.record(&AuditEvent {
            action,
            kind,
            id,
            actor: &user.hashed_id,
            admin: user.is_admin,
        });
    }
}

/// A record together with the etag it was read at.
#[derive(Debug, Clone)]
pub(crate) struct Fetched<T> {
    pub model: T,
    pub etag: Etag,
}

pub(crate) fn not_found_message(kind: DocumentKind, id: &str) -> String {
    format!("{} not found with id: {}", kind.label(), id)
}

pub(crate) fn decode<T: DeserializeOwned>(
    kind: DocumentKind,
    doc: StoredDocument,
) -> Result<Fetched<T>, ServiceError> {
    let model = serde_json::from_value(doc.body).map_err(|e| {
        ServiceError::store(format!("Error reading {}", kind.label()), StoreError::from(e))
    })?;
    Ok(Fetched {
        model,
        etag: doc.etag,
    })
}

pub(crate) fn encode<T: Serialize>(kind: DocumentKind, model: &T) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(model).map_err(|e| {
        ServiceError::store(format!("Error saving {}", kind.label()), StoreError::from(e))
    })
}

pub(crate) async fn find_by_id<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    kind: DocumentKind,
    id: &str,
) -> Result<Fetched<T>, ServiceError> {
    let mut hits = store
        .query(&Query::ById {
            kind,
            id: id.to_string(),
        })
        .await
        .map_err(|e| ServiceError::store(format!("Error finding {}", kind.label()), e))?;
    if hits.is_empty() {
        return Err(ServiceError::NotFound(not_found_message(kind, id)));
    }
    decode(kind, hits.swap_remove(0))
}

/// Fetches a record the caller may read.  Records the caller cannot see are
/// reported exactly like missing ones.
pub(crate) async fn find_visible<T: DeserializeOwned + Shareable>(
    store: &dyn DocumentStore,
    kind: DocumentKind,
    id: &str,
    user: &CurrentUser,
) -> Result<Fetched<T>, ServiceError> {
    let fetched: Fetched<T> = find_by_id(store, kind, id).await?;
    if user.is_admin || fetched.model.is_visible_to(&user.hashed_id, &user.email) {
        Ok(fetched)
    } else {
        Err(ServiceError::NotFound(not_found_message(kind, id)))
    }
}

/// Write-path authorization: admin or owner.
pub(crate) async fn ensure_operation<T: DeserializeOwned + Shareable>(
    store: &dyn DocumentStore,
    kind: DocumentKind,
    id: &str,
    user: &CurrentUser,
) -> Result<Fetched<T>, ServiceError> {
    let fetched: Fetched<T> = find_by_id(store, kind, id).await?;
    if user.is_admin || fetched.model.owner() == user.hashed_id {
        return Ok(fetched);
    }
    tracing::warn!(kind = kind.as_str(), id = %id, actor = %user.hashed_id, "write rejected: not owner");
    Err(ServiceError::Unauthorized(not_found_message(kind, id)))
}

pub(crate) async fn list_visible<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    kind: DocumentKind,
    user: &CurrentUser,
) -> Result<Vec<T>, ServiceError> {
    let docs = store
        .query(&Query::VisibleTo {
            kind,
            user_id: user.hashed_id.clone(),
            principal: user.email.clone(),
        })
        .await
        .map_err(|e| ServiceError::store(format!("Error finding {}", kind.label()), e))?;
    docs.into_iter()
        .map(|doc| decode(kind, doc).map(|f: Fetched<T>| f.model))
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::Backends;
    use crate::audit::AuditSink;
    use crate::identity::CurrentUser;
    use crate::models::SharePrincipal;
    use crate::store::{DocumentStore, Etag, MemoryStore, Query, StoreError, StoredDocument};
    use crate::vault::MemoryVault;

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub vault: Arc<MemoryVault>,
        pub backends: Backends,
    }

    pub fn harness(publish_requires_admin: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(MemoryVault::new());
        let backends = Backends {
            store: store.clone(),
            vault: vault.clone(),
            audit: AuditSink::default(),
            publish_requires_admin,
        };
        Harness {
            store,
            vault,
            backends,
        }
    }

    /// Wraps a `MemoryStore` and can make the next by-id read race with
    /// another writer (the stored etag changes right after it is read), or
    /// refuse every write.
    #[derive(Default)]
    pub struct ContendedStore {
        pub inner: Arc<MemoryStore>,
        pub race_next_read: AtomicBool,
        pub refuse_writes: AtomicBool,
    }

    impl ContendedStore {
        fn check_writable(&self) -> Result<(), StoreError> {
            if self.refuse_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "store offline",
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentStore for ContendedStore {
        async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
            let hits = self.inner.query(query).await?;
            if matches!(query, Query::ById { .. }) && self.race_next_read.swap(false, Ordering::SeqCst) {
                for doc in &hits {
                    self.inner.upsert(doc.body.clone(), None).await?;
                }
            }
            Ok(hits)
        }

        async fn create(&self, body: Value) -> Result<StoredDocument, StoreError> {
            self.check_writable()?;
            self.inner.create(body).await
        }

        async fn upsert(
            &self,
            body: Value,
            if_match: Option<&Etag>,
        ) -> Result<StoredDocument, StoreError> {
            self.check_writable()?;
            self.inner.upsert(body, if_match).await
        }

        async fn delete(
            &self,
            id: &str,
            partition_key: &str,
            if_match: Option<&Etag>,
        ) -> Result<StoredDocument, StoreError> {
            self.check_writable()?;
            self.inner.delete(id, partition_key, if_match).await
        }

        fn backend_name(&self) -> &'static str {
            "contended"
        }
    }

    /// Like `harness`, but the services write through a `ContendedStore`.
    /// `Harness::store` is the wrapped store, so assertions see real state.
    pub fn contended_harness(publish_requires_admin: bool) -> (Harness, Arc<ContendedStore>) {
        let contended = Arc::new(ContendedStore::default());
        let vault = Arc::new(MemoryVault::new());
        let backends = Backends {
            store: contended.clone(),
            vault: vault.clone(),
            audit: AuditSink::default(),
            publish_requires_admin,
        };
        let harness = Harness {
            store: contended.inner.clone(),
            vault,
            backends,
        };
        (harness, contended)
    }

    pub fn race_next_read(store: &ContendedStore) {
        store.race_next_read.store(true, Ordering::SeqCst);
    }

    pub fn refuse_writes(store: &ContendedStore) {
        store.refuse_writes.store(true, Ordering::SeqCst);
    }

    pub fn user(email: &str) -> CurrentUser {
        CurrentUser::new(email, None, &HashSet::new())
    }

    pub fn admin(email: &str) -> CurrentUser {
        let admins: HashSet<String> = [email.to_lowercase()].into_iter().collect();
        CurrentUser::new(email, None, &admins)
    }

    pub fn principal(email: &str) -> SharePrincipal {
        SharePrincipal {
            id: format!("id-{}", email),
            display_name: email.to_string(),
            user_principal_name: email.to_string(),
        }
    }
}
