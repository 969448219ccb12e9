#![allow(dead_code)]

use std::collections::HashMap;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Every variable `AppConfig::from_env` reads.
pub const CONFIG_VARS: &[&str] = &[
    "SHAREGATE_ALLOWED_TOKENS",
    "SHAREGATE_ADMIN_EMAILS",
    "SHAREGATE_PUBLISH_REQUIRES_ADMIN",
    "SHAREGATE_STORE_FILE",
    "SHAREGATE_KEY_VAULT_URL",
    "AZURE_AD_TENANT_ID",
    "AZURE_AD_CLIENT_ID",
    "AZURE_AD_CLIENT_SECRET",
    "SHAREGATE_AUTHORITY_URL",
    "SHAREGATE_GRAPH_URL",
    "SHAREGATE_DIRECTORY_DOMAIN",
    "SHAREGATE_HTTP_TIMEOUT_MS",
    "SHAREGATE_MAX_REQUEST_BYTES",
    "SHAREGATE_AUDIT_LOG_FILE",
    "SHAREGATE_AUDIT_STDOUT",
    "LOG_MAX_BYTES",
    "LOG_ROTATE_KEEP",
    "LOG_ROTATE_COMPRESS",
];

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    /// A guard that starts from a clean Sharegate environment.
    pub fn clean() -> Self {
        let mut guard = Self {
            originals: HashMap::new(),
        };
        for var in CONFIG_VARS {
            guard.remove(var);
        }
        guard
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Serves `router` on an ephemeral local port.
pub async fn spawn(router: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

/// A caller as seen by the `/api` routes.
pub struct Caller {
    pub token: &'static str,
    pub email: &'static str,
}

impl Caller {
    pub const fn new(email: &'static str) -> Self {
        Self {
            token: "test-token",
            email,
        }
    }

    pub fn get(&self, client: &reqwest::Client, url: String) -> reqwest::RequestBuilder {
        self.sign(client.get(url))
    }

    pub fn post(&self, client: &reqwest::Client, url: String) -> reqwest::RequestBuilder {
        self.sign(client.post(url))
    }

    pub fn delete(&self, client: &reqwest::Client, url: String) -> reqwest::RequestBuilder {
        self.sign(client.delete(url))
    }

    fn sign(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.bearer_auth(self.token).header("x-user-email", self.email)
    }
}
