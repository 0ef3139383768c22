//! Integration tests for the HTTP surface, served on an ephemeral port.

use runbook_harness::cache::MemoryCache;
use runbook_harness::config::{FilesystemSourceConfig, RetrievalConfig};
use runbook_harness::registry::SourceRegistry;
use runbook_harness::server::router;
use runbook_harness::source_fs::FilesystemSource;
use serde_json::{json, Value};
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;

async fn start() -> (SocketAddr, TempDir) {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("ops")).unwrap();
    fs::write(
        dir.path().join("ops/disk-space.md"),
        "# Disk space cleanup\n\nFree space on the volume.\n\n1. Check usage with `df -h`\n2. Rotate logs\n",
    )
    .unwrap();

    let mut registry = SourceRegistry::new();
    registry.register(Box::new(
        FilesystemSource::new(
            FilesystemSourceConfig::new("local", dir.path()),
            &RetrievalConfig::default(),
            Arc::new(MemoryCache::default()),
        )
        .unwrap(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(registry));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, dir)
}

#[tokio::test]
async fn health_and_sources() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let sources: Value = client
        .get(format!("http://{}/sources", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sources["health"][0]["source_name"], "local");
    assert_eq!(sources["health"][0]["healthy"], true);
    assert_eq!(sources["metadata"][0]["circuit_state"], "closed");
}

#[tokio::test]
async fn search_and_get_document() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/tools/search", addr))
        .json(&json!({ "query": "disk space", "limit": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let first = &body["results"][0];
    assert_eq!(first["id"], "ops/disk-space.md");
    assert_eq!(first["source"], "local");

    let doc: Value = client
        .get(format!("http://{}/documents/local/ops/disk-space.md", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["title"], "Disk space cleanup");
}

#[tokio::test]
async fn runbooks_endpoint() {
    let (addr, _dir) = start().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/tools/runbooks", addr))
        .json(&json!({ "alert_type": "disk_space", "severity": "high" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["runbooks"][0]["source"], "local");
    assert_eq!(body["runbooks"][0]["runbook"]["metadata"]["synthetic"], true);
}

#[tokio::test]
async fn blank_query_returns_empty_results() {
    let (addr, _dir) = start().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/tools/search", addr))
        .json(&json!({ "query": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "results": [] }));
}

#[tokio::test]
async fn errors_use_the_envelope() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/tools/search", addr))
        .json(&json!({ "query": "disk", "confidence_threshold": 2.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("http://{}/tools/runbooks", addr))
        .json(&json!({ "alert_type": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("http://{}/documents/nope/x", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("http://{}/documents/local/missing.md", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
