//! Microsoft Graph user directory client used to pick share targets.
//!
//! Two lookups exist: a bulk listing of all enabled members of the tenant
//! whose principal name ends with the configured domain (paginated through
//! `@odata.nextLink`), and an interactive prefix search across five identity
//! attributes.  Nothing is retried or cached.

use serde::{Deserialize, Serialize};

use crate::credential::{ClientCredential, CredentialError, GRAPH_SCOPE};

pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";

/// Search terms shorter than this return no results without a lookup.
pub const MIN_SEARCH_LEN: usize = 3;

const SEARCH_KEYS: [&str; 5] = [
    "displayName",
    "givenName",
    "surname",
    "mail",
    "userPrincipalName",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPage {
    #[serde(default)]
    value: Vec<DirectoryUser>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
    #[serde(rename = "@odata.count", default)]
    count: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory is not configured: {0}")]
    Config(String),
    #[error("unable to retrieve token from directory: {0}")]
    Token(#[from] CredentialError),
    #[error("error fetching users: {status} {message}")]
    Http { status: u16, message: String },
    #[error("error fetching users: {0}")]
    Transport(#[from] reqwest::Error),
}

impl DirectoryError {
    /// Status string distinguishing failure classes for callers.
    pub fn status(&self) -> &'static str {
        match self {
            DirectoryError::Config(_) => "CONFIG_ERROR",
            DirectoryError::Token(_) => "TOKEN_ERROR",
            DirectoryError::Http { .. } => "HTTP_ERROR",
            DirectoryError::Transport(e) if e.is_decode() => "DECODE_ERROR",
            DirectoryError::Transport(_) => "HTTP_ERROR",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    pub credential: Option<ClientCredential>,
    pub graph_url: String,
    /// Domain suffix (without `@`) members must have in their principal name.
    pub member_domain: Option<String>,
}

#[derive(Clone)]
pub struct DirectoryClient {
    config: DirectoryConfig,
    http: reqwest::Client,
}

impl DirectoryClient {
    pub fn new(config: DirectoryConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn is_configured(&self) -> bool {
        self.config.credential.is_some()
    }

    async fn token(&self) -> Result<String, DirectoryError> {
        let credential = self.config.credential.as_ref().ok_or_else(|| {
            DirectoryError::Config(
                "AZURE_AD_TENANT_ID, AZURE_AD_CLIENT_ID and AZURE_AD_CLIENT_SECRET are required"
                    .into(),
            )
        })?;
        Ok(credential.get_token(&self.http, GRAPH_SCOPE).await?)
    }

    fn users_url(&self) -> String {
        format!("{}/v1.0/users", self.config.graph_url.trim_end_matches('/'))
    }

    async fn fetch_page(
        &self,
        request: reqwest::RequestBuilder,
        token: &str,
    ) -> Result<UserPage, DirectoryError> {
        let resp = request
            .bearer_auth(token)
            .header("content-type", "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = status.canonical_reason().unwrap_or("").to_string();
            tracing::warn!(status = status.as_u16(), "directory request failed");
            return Err(DirectoryError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json::<UserPage>().await?)
    }

    /// All enabled member accounts of the configured domain.
    pub async fn list_members(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let domain = self
            .config
            .member_domain
            .as_deref()
            .ok_or_else(|| DirectoryError::Config("SHAREGATE_DIRECTORY_DOMAIN is not set".into()))?;
        let token = self.token().await?;
        let filter = member_filter(domain);

        let mut users = Vec::new();
        let mut request = self.http.get(self.users_url()).query(&[
            ("$filter", filter.as_str()),
            ("$count", "true"),
            ("$top", "999"),
        ]);
        let mut calls = 0u32;
        loop {
            calls += 1;
            let page = self
                .fetch_page(request.header("ConsistencyLevel", "eventual"), &token)
                .await?;
            users.extend(page.value);
            tracing::debug!(
                calls,
                fetched = users.len(),
                reported = ?page.count,
                "fetched directory member page"
            );
            match page.next_link {
                Some(next) => request = self.http.get(next),
                None => break,
            }
        }
        tracing::info!(members = users.len(), calls, "listed directory members");
        Ok(users)
    }

    /// Prefix search for share-target pickers.
    pub async fn search(&self, term: &str) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let term = term.trim();
        if term.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }
        let token = self.token().await?;
        let filter = search_filter(term);
        let request = self
            .http
            .get(self.users_url())
            .query(&[("$filter", filter.as_str())]);
        let page = self.fetch_page(request, &token).await?;
        Ok(page.value)
    }
}

fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}

fn member_filter(domain: &str) -> String {
    format!(
        "userType eq 'Member' and accountEnabled eq true and endswith(userPrincipalName, '@{}')",
        escape_odata(domain.trim_start_matches('@'))
    )
}

fn search_filter(term: &str) -> String {
    let term = escape_odata(term);
    SEARCH_KEYS
        .iter()
        .map(|key| format!("startswith({},'{}')", key, term))
        .collect::<Vec<_>>()
        .join(" or ")
}
