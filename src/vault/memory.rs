use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{SecretVault, VaultError};

/// Process-local vault.  Also counts writes and deletions so callers can
/// observe vault traffic.
#[derive(Default)]
pub struct MemoryVault {
    secrets: DashMap<String, String>,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SecretVault for MemoryVault {
    async fn set_secret(&self, name: &str, value: &str) -> Result<(), VaultError> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> Result<Option<String>, VaultError> {
        Ok(self.secrets.get(name).map(|v| v.value().clone()))
    }

    async fn begin_delete_secret(&self, name: &str) -> Result<(), VaultError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.secrets.remove(name);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
