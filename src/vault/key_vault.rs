use async_trait::async_trait;
use serde::Deserialize;

use super::{SecretVault, VaultError};
use crate::credential::{ClientCredential, KEY_VAULT_SCOPE};

const API_VERSION: &str = "7.4";

/// Azure Key Vault secrets over its REST API.
pub struct KeyVault {
    vault_url: String,
    credential: ClientCredential,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    #[serde(default)]
    value: Option<String>,
}

impl KeyVault {
    pub fn new(vault_url: String, credential: ClientCredential, http: reqwest::Client) -> Self {
        Self {
            vault_url,
            credential,
            http,
        }
    }

    fn secret_url(&self, name: &str) -> String {
        format!(
            "{}/secrets/{}?api-version={}",
            self.vault_url.trim_end_matches('/'),
            name,
            API_VERSION
        )
    }

    async fn token(&self) -> Result<String, VaultError> {
        Ok(self.credential.get_token(&self.http, KEY_VAULT_SCOPE).await?)
    }
}

fn rejected(name: &str, status: reqwest::StatusCode) -> VaultError {
    tracing::warn!(secret = %name, status = status.as_u16(), "key vault rejected request");
    VaultError::Rejected {
        name: name.to_string(),
        status: status.as_u16(),
    }
}

#[async_trait]
impl SecretVault for KeyVault {
    async fn set_secret(&self, name: &str, value: &str) -> Result<(), VaultError> {
        let token = self.token().await?;
        let resp = self
            .http
            .put(self.secret_url(name))
            .bearer_auth(token)
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(rejected(name, resp.status()));
        }
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> Result<Option<String>, VaultError> {
        let token = self.token().await?;
        let resp = self
            .http
            .get(self.secret_url(name))
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(rejected(name, resp.status()));
        }
        let bundle: SecretBundle = resp.json().await?;
        Ok(bundle.value)
    }

    async fn begin_delete_secret(&self, name: &str) -> Result<(), VaultError> {
        let token = self.token().await?;
        let resp = self
            .http
            .delete(self.secret_url(name))
            .bearer_auth(token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(rejected(name, resp.status()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "key_vault"
    }
}
