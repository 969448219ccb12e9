//! OAuth client-credential exchange against the Entra ID token endpoint.
//!
//! Both the directory client and the Key Vault backend authenticate with the
//! same tenant/client/secret triple, each for its own scope.  Tokens are not
//! cached: every outbound operation performs a fresh exchange.

use serde::Deserialize;

pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

#[derive(Clone, Debug)]
pub struct ClientCredential {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Base authority URL, without the tenant segment.
    pub authority_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl ClientCredential {
    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// Exchanges the credential for a bearer token valid for `scope`.
    pub async fn get_token(
        &self,
        client: &reqwest::Client,
        scope: &str,
    ) -> Result<String, CredentialError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let resp = client.post(self.token_url()).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), tenant = %self.tenant_id, "token exchange rejected");
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = resp.json().await?;
        tracing::debug!(scope, "obtained client credential token");
        Ok(token.access_token)
    }
}
