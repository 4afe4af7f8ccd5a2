//! Embedding backend client.
//!
//! Talks to an OpenAI-compatible `POST {base}/embeddings` endpoint with
//! task-aware prompts, bounded concurrency, and input-too-long detection so
//! callers can split oversized fragments and retry.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::EmbeddingTask;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

/// Upper bound on concurrent outgoing embedding calls.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

// ---------------------------------------------------------------------------
// Model families and task prompts
// ---------------------------------------------------------------------------

/// Whether the model family supports task-conditioned prompts. For these,
/// `RetrievalDocument` and `RetrievalQuery` produce asymmetric vectors.
pub fn supports_tasks(model: &str) -> bool {
    model.to_ascii_lowercase().contains("embeddinggemma")
}

/// Tasks a fragment is indexed under for the given model: dual document/query
/// sequences for task-conditioned families, a single symmetric sequence
/// otherwise.
pub fn tasks_for_model(model: &str) -> Vec<EmbeddingTask> {
    if supports_tasks(model) {
        vec![EmbeddingTask::RetrievalDocument, EmbeddingTask::RetrievalQuery]
    } else {
        vec![EmbeddingTask::SemanticSimilarity]
    }
}

/// Default task for the corpus side of an index.
pub fn document_task_for(model: &str) -> EmbeddingTask {
    if supports_tasks(model) {
        EmbeddingTask::RetrievalDocument
    } else {
        EmbeddingTask::SemanticSimilarity
    }
}

/// Prompt conditioning for task-aware model families. Task-blind models get
/// the raw text; the `task` field on the fragment then records intent only.
pub fn apply_task_prompt(model: &str, task: EmbeddingTask, text: &str) -> String {
    if !supports_tasks(model) {
        return text.to_string();
    }
    match task {
        EmbeddingTask::RetrievalDocument => format!("title: none | text: {text}"),
        EmbeddingTask::RetrievalQuery => format!("task: search result | query: {text}"),
        EmbeddingTask::SemanticSimilarity => {
            format!("task: sentence similarity | query: {text}")
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Map a non-success backend response to the taxonomy: input-too-long answers
/// are recognized distinctly so the caller can split and retry.
fn classify_backend_error(status: u16, body: &str) -> Error {
    let lower = body.to_ascii_lowercase();
    let too_long = ["too long", "too large", "context length", "maximum context", "max_tokens"]
        .iter()
        .any(|m| lower.contains(m));
    let snippet: String = body.chars().take(200).collect();
    if too_long {
        Error::InputTooLong(snippet)
    } else {
        Error::Backend(format!("HTTP {status}: {snippet}"))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for the configured embeddings endpoint. Construct once per process
/// via [`EmbeddingClient::global`]; tests build their own with
/// [`EmbeddingClient::new`] against a mock endpoint.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    semaphore: Arc<Semaphore>,
}

static CLIENT: OnceLock<EmbeddingClient> = OnceLock::new();

impl EmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        max_in_flight: usize,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Process-wide lazily initialized client. The first call reads the
    /// configured endpoint and key; later calls reuse the same instance.
    pub fn global(config: &Config) -> &'static EmbeddingClient {
        CLIENT.get_or_init(|| {
            Self::new(config.effective_api_base_url(), config.api_key.clone(), DEFAULT_MAX_IN_FLIGHT)
        })
    }

    /// Generate a single embedding.
    pub async fn embed(&self, text: &str, model: &str, task: EmbeddingTask) -> Result<Vec<f32>> {
        let input = apply_task_prompt(model, task, text);
        let mut vectors = self
            .request(serde_json::json!({ "model": model, "input": input }))
            .await?;
        match vectors.len() {
            1 => Ok(vectors.swap_remove(0)),
            n => Err(Error::Backend(format!("expected 1 embedding, got {n}"))),
        }
    }

    /// Generate embeddings for a batch of texts, preserving input order.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        model: &str,
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<String> =
            texts.iter().map(|t| apply_task_prompt(model, task, t)).collect();
        let vectors = self
            .request(serde_json::json!({ "model": model, "input": inputs }))
            .await?;
        if vectors.len() != texts.len() {
            return Err(Error::Backend(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    async fn request(&self, body: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Backend("embedding semaphore closed".to_string()))?;

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_backend_error(status.as_u16(), &text));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("invalid embeddings response: {e}")))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
