#[path = "common/mod.rs"]
mod common;

use common::{spawn, Caller, EnvGuard};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sharegate::{app, build_state_from_env, AppConfig};
use tokio::sync::Mutex;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const ALICE: Caller = Caller::new("alice@contoso.com");

#[tokio::test]
async fn rejects_invalid_environment_values() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::clean();

    env.set("LOG_ROTATE_COMPRESS", "maybe");
    let err = AppConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("LOG_ROTATE_COMPRESS"));
    env.remove("LOG_ROTATE_COMPRESS");

    env.set("SHAREGATE_HTTP_TIMEOUT_MS", "soon");
    let err = AppConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("SHAREGATE_HTTP_TIMEOUT_MS"));
    env.remove("SHAREGATE_HTTP_TIMEOUT_MS");

    env.set_many(&[("AZURE_AD_TENANT_ID", "t"), ("AZURE_AD_CLIENT_ID", "c")]);
    assert!(build_state_from_env().await.is_err());
}

#[tokio::test]
async fn snapshot_store_survives_restart_and_audit_is_written() {
    let _lock = ENV_MUTEX.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("documents.json");
    let audit_path = dir.path().join("audit.log");
    let mut env = EnvGuard::clean();
    env.set_many(&[
        ("SHAREGATE_STORE_FILE", store_path.to_str().unwrap()),
        ("SHAREGATE_AUDIT_LOG_FILE", audit_path.to_str().unwrap()),
        ("SHAREGATE_ALLOWED_TOKENS", "test-token"),
    ]);
    let client = Client::new();

    let (base, handle) = spawn(app(build_state_from_env().await.unwrap())).await;
    let resp = ALICE
        .post(&client, format!("{}/api/personas", base))
        .form(&[
            ("name", "Durable"),
            ("description", "Survives restarts"),
            ("personaMessage", "Remember me."),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created: Value = resp.json().await.unwrap();
    let id = created["response"]["id"].as_str().unwrap().to_string();
    handle.abort();
    assert!(store_path.exists());

    let (base, handle) = spawn(app(build_state_from_env().await.unwrap())).await;
    let resp = ALICE
        .get(&client, format!("{}/api/personas/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["response"]["name"], "Durable");

    let health: Value = client
        .get(format!("{}/healthz", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["store"], "file");
    handle.abort();

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    let lines: Vec<Value> = audit
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["action"], "create");
    assert_eq!(lines[0]["kind"], "PERSONA");
    assert_eq!(lines[0]["id"], id.as_str());
}
