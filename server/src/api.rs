//! HTTP API: search endpoints over the on-disk indexes.
//!
//! `GET /` and `GET /openapi.json` are open; the search endpoints require
//! `Authorization: Bearer <apiKey>`. CORS is permissive and `OPTIONS` always
//! succeeds. Unknown paths return 404 JSON, wrong methods 405 JSON, and a
//! body that fails to parse 500 JSON.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::embed::EmbeddingClient;
use crate::query::{self, DEFAULT_MAX_RESULTS};
use crate::types::IndexCache;

// ---------------------------------------------------------------------------
// Shared application context
// ---------------------------------------------------------------------------

/// State shared by the HTTP handlers and the MCP dispatcher.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub cache: Arc<IndexCache>,
    pub client: EmbeddingClient,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        let client = EmbeddingClient::global(&config).clone();
        Self { config: Arc::new(config), cache: Arc::new(IndexCache::new()), client }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(ctx: AppContext) -> Router {
    let protected = Router::new()
        .route("/search/ripgrep", post(search_ripgrep))
        .route("/search/embedding", post(search_embedding))
        .layer(axum::middleware::from_fn_with_state(ctx.clone(), require_bearer));

    Router::new()
        .route("/", get(service_info))
        .route("/openapi.json", get(openapi_doc))
        .merge(protected)
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn not_found() -> Response {
    error_json(StatusCode::NOT_FOUND, "not found")
}

async fn method_not_allowed() -> Response {
    error_json(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

// ---------------------------------------------------------------------------
// Bearer auth middleware
// ---------------------------------------------------------------------------

/// Require `Authorization: Bearer <apiKey>` on protected routes. An empty
/// configured key rejects everything rather than accepting everything.
async fn require_bearer(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, Response> {
    let expected = ctx.config.api_key.as_str();
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = !expected.is_empty() && presented == Some(expected);
    if authorized {
        Ok(next.run(request).await)
    } else {
        Err(error_json(StatusCode::UNAUTHORIZED, "unauthorized"))
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RipgrepSearchRequest {
    pattern: String,
    #[serde(default)]
    case_sensitive: Option<bool>,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingSearchRequest {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    extensions: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Root endpoint: unauthenticated service banner.
async fn service_info(State(ctx): State<AppContext>) -> impl IntoResponse {
    let indexes = crate::config::index_files().map(|f| f.len()).unwrap_or(0);
    Json(serde_json::json!({
        "name": "fathom",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
        "indexes": indexes,
        "embeddingModel": ctx.config.embedding_model,
    }))
}

/// `POST /search/ripgrep` — lexical search across all indexes.
async fn search_ripgrep(State(ctx): State<AppContext>, body: String) -> Response {
    // Hand-parsed so malformed JSON maps to the contract's 500, not a 4xx
    // rejection from the extractor.
    let request: RipgrepSearchRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, &format!("invalid JSON: {e}"))
        }
    };

    let results = match query::ripgrep_search_all(
        &ctx.cache,
        &request.pattern,
        request.case_sensitive.unwrap_or(false),
        request.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
    )
    .await
    {
        Ok(results) => results,
        Err(e) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    Json(serde_json::json!({ "count": results.len(), "results": results })).into_response()
}

/// `POST /search/embedding` — semantic search across all indexes.
async fn search_embedding(State(ctx): State<AppContext>, body: String) -> Response {
    let request: EmbeddingSearchRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, &format!("invalid JSON: {e}"))
        }
    };

    let extensions = request.extensions.unwrap_or_default();
    let results = match query::semantic_search_all(
        &ctx.cache,
        &ctx.config,
        &ctx.client,
        &request.query,
        request.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
        request.model.as_deref(),
        &extensions,
    )
    .await
    {
        Ok(results) => results,
        Err(e) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    Json(serde_json::json!({ "count": results.len(), "results": results })).into_response()
}

/// `GET /openapi.json` — machine-readable API description.
async fn openapi_doc() -> impl IntoResponse {
    Json(serde_json::json!({
        "openapi": "3.1.0",
        "info": {
            "title": "fathom",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Local code and document search: ripgrep and embedding search over on-disk indexes."
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer" }
            },
            "schemas": {
                "RipgrepSearchRequest": {
                    "type": "object",
                    "required": ["pattern"],
                    "properties": {
                        "pattern": { "type": "string" },
                        "caseSensitive": { "type": "boolean", "default": false },
                        "maxResults": { "type": "integer", "default": DEFAULT_MAX_RESULTS }
                    }
                },
                "EmbeddingSearchRequest": {
                    "type": "object",
                    "required": ["query"],
                    "properties": {
                        "query": { "type": "string" },
                        "maxResults": { "type": "integer", "default": DEFAULT_MAX_RESULTS },
                        "model": { "type": "string" },
                        "extensions": { "type": "array", "items": { "type": "string" } }
                    }
                },
                "LexicalHit": {
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "filename": { "type": "string" },
                        "lineNumber": { "type": "integer" },
                        "lineContent": { "type": "string" },
                        "matchStart": { "type": "integer" },
                        "matchEnd": { "type": "integer" }
                    }
                },
                "SemanticHit": {
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "filename": { "type": "string" },
                        "startLine": { "type": "integer" },
                        "endLine": { "type": "integer" },
                        "similarity": { "type": "number" },
                        "chunkAlgorithm": { "type": "string" },
                        "fragmentType": { "type": "string" }
                    }
                }
            }
        },
        "paths": {
            "/": {
                "get": { "summary": "Service banner", "responses": { "200": { "description": "OK" } } }
            },
            "/openapi.json": {
                "get": { "summary": "This document", "responses": { "200": { "description": "OK" } } }
            },
            "/search/ripgrep": {
                "post": {
                    "summary": "Lexical search via ripgrep across all indexes",
                    "security": [{ "bearerAuth": [] }],
                    "requestBody": {
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/RipgrepSearchRequest" } } }
                    },
                    "responses": {
                        "200": { "description": "Matches, merged by (filename, lineNumber)" },
                        "401": { "description": "Missing or wrong bearer token" }
                    }
                }
            },
            "/search/embedding": {
                "post": {
                    "summary": "Semantic search across all indexes",
                    "security": [{ "bearerAuth": [] }],
                    "requestBody": {
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/EmbeddingSearchRequest" } } }
                    },
                    "responses": {
                        "200": { "description": "Hits ranked by cosine similarity" },
                        "401": { "description": "Missing or wrong bearer token" }
                    }
                }
            }
        }
    }))
}
