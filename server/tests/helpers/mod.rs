//! Shared harness for integration tests: an in-process mock of the
//! OpenAI-compatible embeddings endpoint, plus fixture scaffolding.
#![allow(dead_code)]

use axum::{routing::post, Json, Router};
use fathom::embed::EmbeddingClient;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use tempfile::TempDir;

/// Point `~/.fathom` at a process-lifetime temp dir so tests never touch the
/// real home directory.
pub fn isolate_home() {
    static HOME: LazyLock<TempDir> = LazyLock::new(|| TempDir::new().expect("temp home"));
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| std::env::set_var("FATHOM_HOME", HOME.path()));
}

/// Deterministic 8-dim pseudo-embedding derived from the input text, so the
/// mock backend behaves like a real one: equal inputs map to equal vectors.
pub fn mock_vector(text: &str) -> Vec<f32> {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| (*b as f32 - 128.0) / 128.0).collect()
}

async fn embeddings(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    let inputs: Vec<String> = match &body["input"] {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    };
    let data: Vec<serde_json::Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| serde_json::json!({ "index": i, "embedding": mock_vector(text) }))
        .collect();
    Json(serde_json::json!({ "object": "list", "data": data }))
}

/// Spawn the mock embeddings backend on an ephemeral port and return its base
/// URL. The server task lives until the test process exits.
pub async fn spawn_mock_backend() -> String {
    let app = Router::new().route("/embeddings", post(embeddings));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock backend");
    let addr = listener.local_addr().expect("mock backend addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock backend serve");
    });
    format!("http://{addr}")
}

/// Client wired to a fresh mock backend.
pub async fn mock_client() -> EmbeddingClient {
    let base = spawn_mock_backend().await;
    EmbeddingClient::new(base, "test-key", 10)
}

fn git(root: &std::path::Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .expect("git not on PATH");
    assert!(status.success(), "git {args:?} failed");
}

/// `git init` + initial commit so repo metadata resolves to a real HEAD.
pub fn init_git_repo(root: &std::path::Path) {
    git(root, &["init"]);
    git(root, &["add", "-A"]);
    git(
        root,
        &[
            "-c",
            "user.email=test@test.com",
            "-c",
            "user.name=Test",
            "commit",
            "-m",
            "Initial commit",
        ],
    );
}
