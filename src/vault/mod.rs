//! Secret vault abstraction holding live extension header values.
//!
//! Secrets are named by the header id they belong to.  Deletion is
//! asynchronous on the service side (`begin_delete_secret`), so a successful
//! call only means the deletion was accepted.

use async_trait::async_trait;

pub mod key_vault;
pub mod memory;

pub use self::key_vault::KeyVault;
pub use self::memory::MemoryVault;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault authentication failed: {0}")]
    Credential(#[from] crate::credential::CredentialError),
    #[error("vault request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vault returned {status} for secret '{name}'")]
    Rejected { name: String, status: u16 },
}

#[async_trait]
pub trait SecretVault: Send + Sync {
    async fn set_secret(&self, name: &str, value: &str) -> Result<(), VaultError>;

    /// Returns `None` if no secret exists under `name`.
    async fn get_secret(&self, name: &str) -> Result<Option<String>, VaultError>;

    async fn begin_delete_secret(&self, name: &str) -> Result<(), VaultError>;

    /// Short label reported by `/healthz`.
    fn backend_name(&self) -> &'static str;
}
