use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Result};

use crate::credential::{ClientCredential, DEFAULT_AUTHORITY_URL};
use crate::directory::DEFAULT_GRAPH_URL;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub allowed_tokens: Option<HashSet<String>>,
    /// Lower-cased admin principal names.
    pub admin_emails: HashSet<String>,
    pub publish_requires_admin: bool,
    pub store_file: Option<String>,
    pub key_vault_url: Option<String>,
    pub credential: Option<ClientCredential>,
    pub graph_url: String,
    pub directory_domain: Option<String>,
    pub http_timeout_ms: u64,
    pub max_request_bytes: Option<usize>,
    pub audit_log_file: Option<String>,
    pub audit_stdout: bool,
    pub rotation: RotationConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let allowed_tokens = parse_list("SHAREGATE_ALLOWED_TOKENS").filter(|set| !set.is_empty());
        let admin_emails = parse_list("SHAREGATE_ADMIN_EMAILS")
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.to_lowercase())
            .collect();

        let credential = match (
            non_empty_var("AZURE_AD_TENANT_ID"),
            non_empty_var("AZURE_AD_CLIENT_ID"),
            non_empty_var("AZURE_AD_CLIENT_SECRET"),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(ClientCredential {
                tenant_id,
                client_id,
                client_secret,
                authority_url: non_empty_var("SHAREGATE_AUTHORITY_URL")
                    .unwrap_or_else(|| DEFAULT_AUTHORITY_URL.to_string()),
            }),
            (None, None, None) => None,
            _ => {
                return Err(anyhow!(
                    "AZURE_AD_TENANT_ID, AZURE_AD_CLIENT_ID and AZURE_AD_CLIENT_SECRET must be set together"
                ))
            }
        };

        let key_vault_url = non_empty_var("SHAREGATE_KEY_VAULT_URL");
        if key_vault_url.is_some() && credential.is_none() {
            return Err(anyhow!(
                "SHAREGATE_KEY_VAULT_URL requires the AZURE_AD_* credential variables"
            ));
        }

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            allowed_tokens,
            admin_emails,
            publish_requires_admin: parse_bool_env("SHAREGATE_PUBLISH_REQUIRES_ADMIN")?
                .unwrap_or(true),
            store_file: non_empty_var("SHAREGATE_STORE_FILE"),
            key_vault_url,
            credential,
            graph_url: non_empty_var("SHAREGATE_GRAPH_URL")
                .unwrap_or_else(|| DEFAULT_GRAPH_URL.to_string()),
            directory_domain: non_empty_var("SHAREGATE_DIRECTORY_DOMAIN"),
            http_timeout_ms: parse_optional_u64("SHAREGATE_HTTP_TIMEOUT_MS")?.unwrap_or(5000),
            max_request_bytes: parse_optional_u64("SHAREGATE_MAX_REQUEST_BYTES")?
                .map(|v| v as usize),
            audit_log_file: non_empty_var("SHAREGATE_AUDIT_LOG_FILE"),
            audit_stdout: parse_bool_env("SHAREGATE_AUDIT_STDOUT")?.unwrap_or(false),
            rotation,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            allowed_tokens: None,
            admin_emails: HashSet::new(),
            publish_requires_admin: true,
            store_file: None,
            key_vault_url: None,
            credential: None,
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            directory_domain: None,
            http_timeout_ms: 5000,
            max_request_bytes: None,
            audit_log_file: None,
            audit_stdout: false,
            rotation: RotationConfig {
                max_bytes: None,
                keep: 1,
                compress: false,
            },
        }
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_list(var: &str) -> Option<HashSet<String>> {
    env::var(var).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect::<HashSet<_>>()
    })
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
