//! Query engine: semantic search over fragment embeddings and lexical search
//! through an external ripgrep process, plus the multi-index merge layer the
//! CLI and servers share.

use crate::config::{self, Config};
use crate::embed::{self, EmbeddingClient};
use crate::error::Result;
use crate::similarity::cosine;
use crate::types::{EmbeddingTask, Index, IndexCache};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Default result cap shared by the CLI, HTTP, and MCP surfaces.
pub const DEFAULT_MAX_RESULTS: usize = 20;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One semantic hit: a fragment, its file, and the cosine similarity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticHit {
    pub path: String,
    pub filename: String,
    pub start_line: u32,
    pub end_line: u32,
    pub similarity: f32,
    pub chunk_algorithm: String,
    pub fragment_type: String,
}

/// One lexical (ripgrep) hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LexicalHit {
    pub path: String,
    pub filename: String,
    pub line_number: u64,
    pub line_content: String,
    pub match_start: u64,
    pub match_end: u64,
}

// ---------------------------------------------------------------------------
// Semantic search
// ---------------------------------------------------------------------------

fn extension_key(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

fn normalize_ext(ext: &str) -> String {
    let e = ext.to_ascii_lowercase();
    if e.starts_with('.') {
        e
    } else {
        format!(".{e}")
    }
}

/// Rank an index's fragments against a pre-computed query vector. Only
/// fragments matching the requested model and task participate; files are
/// skipped wholesale when an extension filter is given and does not match.
/// Ties on similarity keep insertion order.
pub fn semantic_search_with_vector(
    index: &Index,
    query_vector: &[f32],
    max_results: usize,
    model: &str,
    task: EmbeddingTask,
    allowed_extensions: &[String],
) -> Vec<SemanticHit> {
    let mut hits: Vec<SemanticHit> = Vec::new();

    for (path, file) in index.files() {
        if !allowed_extensions.is_empty() {
            let ext = extension_key(path);
            if !allowed_extensions.iter().any(|e| normalize_ext(e) == ext) {
                continue;
            }
        }

        for fragment in &file.fragments {
            if fragment.model != model || fragment.task != task {
                continue;
            }
            if fragment.embedding.is_empty() {
                continue;
            }
            let Ok(similarity) = cosine(&fragment.embedding, query_vector) else {
                continue;
            };
            hits.push(SemanticHit {
                path: file.path.clone(),
                filename: file.filename.clone(),
                start_line: fragment.start_line,
                end_line: fragment.end_line,
                similarity,
                chunk_algorithm: fragment.chunk_algorithm.clone(),
                fragment_type: fragment.fragment_type.clone(),
            });
        }
    }

    // Stable sort keeps insertion order on ties.
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(max_results);
    hits
}

/// Semantic search over a single index from query text.
pub async fn semantic_search(
    index: &Index,
    query: &str,
    max_results: usize,
    model: &str,
    task: EmbeddingTask,
    allowed_extensions: &[String],
    client: &EmbeddingClient,
) -> Result<Vec<SemanticHit>> {
    let query_vector = client.embed(query, model, task).await?;
    Ok(semantic_search_with_vector(
        index,
        &query_vector,
        max_results,
        model,
        task,
        allowed_extensions,
    ))
}

/// Semantic search across every index on disk. `max_results` caps each index
/// and the merged result; the query is embedded once.
pub async fn semantic_search_all(
    cache: &IndexCache,
    config: &Config,
    client: &EmbeddingClient,
    query: &str,
    max_results: usize,
    model_override: Option<&str>,
    allowed_extensions: &[String],
) -> Result<Vec<SemanticHit>> {
    let model = model_override.unwrap_or(&config.embedding_model);
    let task = embed::document_task_for(model);
    let query_vector = client.embed(query, model, task).await?;

    let mut merged: Vec<SemanticHit> = Vec::new();
    for index in load_indexes(cache)? {
        merged.extend(semantic_search_with_vector(
            &index,
            &query_vector,
            max_results,
            model,
            task,
            allowed_extensions,
        ));
    }

    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(max_results);
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Lexical search (ripgrep subprocess)
// ---------------------------------------------------------------------------

/// Resolve a path reported by ripgrep against the index map: exact lookup
/// first, then a suffix match.
fn resolve_record<'a>(index: &'a Index, reported: &str) -> Option<&'a crate::types::FileRecord> {
    if let Some(record) = index.files().get(reported) {
        return Some(record);
    }
    index
        .files()
        .iter()
        .find(|(key, _)| key.ends_with(reported))
        .map(|(_, record)| record)
}

/// Lexical search rooted at the index's path. Arguments are passed as
/// discrete argv entries — user input never reaches a shell. Any subprocess
/// failure, non-zero exit included, yields an empty result set.
pub async fn ripgrep_search(
    index: &Index,
    pattern: &str,
    case_sensitive: bool,
    max_results: usize,
) -> Vec<LexicalHit> {
    let mut command = tokio::process::Command::new("rg");
    command.arg("--json").arg("--line-number").arg("--column");
    if !case_sensitive {
        command.arg("--ignore-case");
    }
    command.arg(pattern).arg(index.path());
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null());

    let output = match command.output().await {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "ripgrep unavailable, returning no lexical hits");
            return Vec::new();
        }
    };
    if !output.status.success() {
        return Vec::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut hits = Vec::new();

    for line in stdout.lines() {
        // Malformed JSON lines are skipped silently.
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if value["type"] != "match" {
            continue;
        }
        let data = &value["data"];
        let Some(reported_path) = data["path"]["text"].as_str() else {
            continue;
        };
        let Some(record) = resolve_record(index, reported_path) else {
            continue;
        };
        let line_number = data["line_number"].as_u64().unwrap_or(0);
        let line_content = data["lines"]["text"].as_str().unwrap_or("").trim().to_string();

        let Some(submatches) = data["submatches"].as_array() else {
            continue;
        };
        for submatch in submatches {
            if hits.len() >= max_results {
                return hits;
            }
            let start = submatch["start"].as_u64().unwrap_or(0);
            let end = submatch["end"].as_u64().unwrap_or(start + 1);
            hits.push(LexicalHit {
                path: record.path.clone(),
                filename: record.filename.clone(),
                line_number,
                line_content: line_content.clone(),
                match_start: start,
                match_end: end.saturating_sub(1),
            });
        }
    }

    hits
}

/// Lexical search across every index on disk, merged by
/// `(filename, line_number)`.
pub async fn ripgrep_search_all(
    cache: &IndexCache,
    pattern: &str,
    case_sensitive: bool,
    max_results: usize,
) -> Result<Vec<LexicalHit>> {
    let mut merged: Vec<LexicalHit> = Vec::new();
    for index in load_indexes(cache)? {
        merged.extend(ripgrep_search(&index, pattern, case_sensitive, max_results).await);
    }
    merged.sort_by(|a, b| {
        (a.filename.as_str(), a.line_number).cmp(&(b.filename.as_str(), b.line_number))
    });
    merged.truncate(max_results);
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Index enumeration
// ---------------------------------------------------------------------------

fn load_indexes(cache: &IndexCache) -> Result<Vec<Arc<Index>>> {
    Ok(config::index_files()?
        .iter()
        .filter_map(|path| cache.load(path))
        .collect())
}

/// Summary of one on-disk index, for `fathom show`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub file: PathBuf,
    pub kind: String,
    pub root: String,
    pub files: usize,
    pub fragments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_dirty: Option<bool>,
}

/// Enumerate every loadable index on disk.
pub fn show_indexes(cache: &IndexCache) -> Result<Vec<IndexInfo>> {
    let mut infos = Vec::new();
    for path in config::index_files()? {
        let Some(index) = cache.load(&path) else { continue };
        let (name, latest_commit_hash, is_dirty) = match index.as_ref() {
            Index::GitRepo(repo) => (
                Some(repo.name.clone()),
                Some(repo.latest_commit_hash.clone()),
                Some(repo.is_dirty),
            ),
            Index::Folder(_) => (None, None, None),
        };
        infos.push(IndexInfo {
            file: path,
            kind: index.kind().to_string(),
            root: index.path().to_string(),
            files: index.files().len(),
            fragments: index.fragment_count(),
            name,
            latest_commit_hash,
            is_dirty,
        });
    }
    Ok(infos)
}
