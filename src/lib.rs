//! Core library for Sharegate.  This module wires the document store, the
//! secret vault and the identity directory into the persona / extension
//! services and exposes them over HTTP.

pub mod audit;
mod config;
pub mod credential;
pub mod directory;
mod handlers;
pub mod identity;
pub mod models;
pub mod response;
pub mod services;
pub mod store;
pub mod validation;
pub mod vault;

pub use config::{AppConfig, RotationConfig};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::audit::{AuditSink, RotatingWriter};
use crate::directory::{DirectoryClient, DirectoryConfig};
use crate::response::ActionStatus;
use crate::services::{Backends, ChatService, ExtensionService, FunctionInvoker, PersonaService};
use crate::store::{DocumentStore, FileStore, MemoryStore};
use crate::vault::{KeyVault, MemoryVault, SecretVault};

/// Per-outcome request counters exposed on `/metrics`.
#[derive(Default)]
pub struct RequestMetrics {
    pub requests_total: AtomicU64,
    pub ok_total: AtomicU64,
    pub error_total: AtomicU64,
    pub not_found_total: AtomicU64,
    pub unauthorized_total: AtomicU64,
}

impl RequestMetrics {
    pub fn record(&self, status: ActionStatus) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            ActionStatus::Ok => &self.ok_total,
            ActionStatus::Error => &self.error_total,
            ActionStatus::NotFound => &self.not_found_total,
            ActionStatus::Unauthorized => &self.unauthorized_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub personas: PersonaService,
    pub extensions: ExtensionService,
    pub chats: ChatService,
    pub invoker: FunctionInvoker,
    pub directory: DirectoryClient,
    pub allowed_tokens: Option<HashSet<String>>, // bearer allowlist
    /// Lower-cased admin principal names.
    pub admin_emails: HashSet<String>,
    /// Maximum accepted raw request body size in bytes (None => unlimited)
    pub max_request_bytes: Option<usize>,
    pub audit: AuditSink,
    pub metrics: Arc<RequestMetrics>,
    pub store_backend: &'static str,
    pub vault_backend: &'static str,
    // Process start time (epoch secs) and instant for uptime computation
    pub process_start_epoch: f64,
    pub process_start_instant: Instant,
}

impl AppState {
    /// Assembles the services around already-built backends.  The outbound
    /// client is shared by function invocation and the directory.
    pub fn new(config: &AppConfig, backends: Backends, http: reqwest::Client) -> Self {
        let directory = DirectoryClient::new(
            DirectoryConfig {
                credential: config.credential.clone(),
                graph_url: config.graph_url.clone(),
                member_domain: config.directory_domain.clone(),
            },
            http.clone(),
        );
        let extensions = ExtensionService::new(backends.clone());
        let start_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        Self {
            personas: PersonaService::new(backends.clone()),
            invoker: FunctionInvoker::new(extensions.clone(), http),
            extensions,
            chats: ChatService::new(backends.clone()),
            directory,
            allowed_tokens: config.allowed_tokens.clone(),
            admin_emails: config.admin_emails.clone(),
            max_request_bytes: config.max_request_bytes,
            audit: backends.audit,
            metrics: Arc::new(RequestMetrics::default()),
            store_backend: backends.store.backend_name(),
            vault_backend: backends.vault.backend_name(),
            process_start_epoch: start_time.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }
}

/// Build state from a parsed configuration: opens the snapshot store and the
/// vault it names, falling back to in-memory backends when unset.
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()?;

    let store: Arc<dyn DocumentStore> = match config.store_file.as_deref() {
        Some(path) => Arc::new(FileStore::open(path).await?),
        None => {
            tracing::warn!("SHAREGATE_STORE_FILE not set; documents are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let vault: Arc<dyn SecretVault> = match (config.key_vault_url.as_ref(), config.credential.as_ref()) {
        (Some(url), Some(credential)) => {
            Arc::new(KeyVault::new(url.clone(), credential.clone(), http.clone()))
        }
        (Some(_), None) => {
            tracing::warn!("SHAREGATE_KEY_VAULT_URL set without AZURE_AD credentials; header secrets are kept in memory only");
            Arc::new(MemoryVault::new())
        }
        (None, _) => {
            tracing::warn!("SHAREGATE_KEY_VAULT_URL not set; header secrets are kept in memory only");
            Arc::new(MemoryVault::new())
        }
    };

    let audit_writer = match config.audit_log_file.as_deref() {
        Some(path) => match RotatingWriter::open(path, &config.rotation) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to open SHAREGATE_AUDIT_LOG_FILE; audit file disabled");
                None
            }
        },
        None => None,
    };
    let backends = Backends {
        store,
        vault,
        audit: AuditSink::new(audit_writer, config.audit_stdout),
        publish_requires_admin: config.publish_requires_admin,
    };
    Ok(AppState::new(&config, backends, http))
}

/// Build state from environment variables.  See `AppConfig::from_env` for the
/// variables read.
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    build_state(AppConfig::from_env()?).await
}

/// Build the Axum router and attach handlers.  The router holds a copy
/// of the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let api = Router::new()
        .route(
            "/personas",
            get(handlers::list_personas).post(handlers::save_persona),
        )
        .route(
            "/personas/:id",
            get(handlers::find_persona).delete(handlers::delete_persona),
        )
        .route("/personas/:id/chat", post(handlers::chat_with_persona))
        .route(
            "/extensions",
            get(handlers::list_extensions).post(handlers::save_extension),
        )
        .route(
            "/extensions/:id",
            get(handlers::find_extension).delete(handlers::delete_extension),
        )
        .route("/extensions/:id/chat", post(handlers::chat_with_extension))
        .route(
            "/extensions/:id/functions/:name/invoke",
            post(handlers::invoke_function),
        )
        .route("/directory/users", get(handlers::search_users))
        .route("/directory/members", get(handlers::list_members));

    let router = Router::new()
        .nest("/api", api)
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store_backend,
        "vault": state.vault_backend,
        "directoryConfigured": state.directory.is_configured(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition. Text format with simple counters.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let mut buf = String::new();
    let m = &state.metrics;
    let counters: [(&str, &str, u64); 7] = [
        (
            "sharegate_requests_total",
            "Total /api requests answered",
            m.requests_total.load(Ordering::Relaxed),
        ),
        (
            "sharegate_responses_ok_total",
            "Requests answered with status OK",
            m.ok_total.load(Ordering::Relaxed),
        ),
        (
            "sharegate_responses_error_total",
            "Requests answered with status ERROR",
            m.error_total.load(Ordering::Relaxed),
        ),
        (
            "sharegate_responses_not_found_total",
            "Requests answered with status NOT_FOUND",
            m.not_found_total.load(Ordering::Relaxed),
        ),
        (
            "sharegate_responses_unauthorized_total",
            "Requests answered with status UNAUTHORIZED",
            m.unauthorized_total.load(Ordering::Relaxed),
        ),
        (
            "sharegate_audit_lines_total",
            "Audit JSON lines written",
            state.audit.lines_total(),
        ),
        (
            "sharegate_audit_write_errors_total",
            "Audit JSON line write failures",
            state.audit.write_errors_total(),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(&mut buf, "# HELP {} {}", name, help).ok();
        writeln!(&mut buf, "# TYPE {} counter", name).ok();
        writeln!(&mut buf, "{} {}", name, value).ok();
    }
    writeln!(
        &mut buf,
        "# HELP sharegate_build_info Build information\n# TYPE sharegate_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "sharegate_build_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP sharegate_process_start_time_seconds Start time of the process since unix epoch in seconds\n# TYPE sharegate_process_start_time_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "sharegate_process_start_time_seconds {}",
        state.process_start_epoch
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP sharegate_uptime_seconds Process uptime in seconds\n# TYPE sharegate_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "sharegate_uptime_seconds {}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
