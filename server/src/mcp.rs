//! MCP JSON-RPC server implementing the Model Context Protocol over stdio.
//!
//! Exposes two tools — `ripgrep_search` and `embedding_search` — whose
//! results are JSON-stringified payloads of the same shape the HTTP endpoints
//! return. Handles protocol version negotiation and init-ordering
//! enforcement.

use crate::api::AppContext;
use crate::query::{self, DEFAULT_MAX_RESULTS};
use std::io::Write as IoWrite;
use tokio::io::AsyncBufReadExt;

// ---------------------------------------------------------------------------
// Protocol version negotiation
// ---------------------------------------------------------------------------

const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == client_version)
        .copied()
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

fn tool_definitions() -> serde_json::Value {
    let read_only = serde_json::json!({
        "readOnlyHint": true,
        "destructiveHint": false,
        "idempotentHint": true,
        "openWorldHint": false
    });

    serde_json::json!([
        {
            "name": "ripgrep_search",
            "annotations": read_only,
            "description": "Exact text search across all indexed folders and repositories via ripgrep. Use for literal strings, identifiers, and regex patterns. Results merge across indexes sorted by (filename, line).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex pattern (ripgrep syntax)" },
                    "caseSensitive": { "type": "boolean", "description": "Match case-sensitively. Default: false" },
                    "maxResults": { "type": "integer", "description": "Hard cap on returned matches. Default: 20" }
                },
                "required": ["pattern"]
            }
        },
        {
            "name": "embedding_search",
            "annotations": read_only,
            "description": "Semantic search across all indexed folders and repositories by cosine similarity against fragment embeddings. Use for conceptual queries ('where is retry logic handled'). Optionally restrict by file extension.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Natural-language query" },
                    "maxResults": { "type": "integer", "description": "Hard cap on returned hits. Default: 20" },
                    "model": { "type": "string", "description": "Embedding model (defaults to the configured one; must match the model the index was built with)" },
                    "extensions": { "type": "array", "items": { "type": "string" }, "description": "Only return hits from files with these extensions (e.g. [\".rs\", \".md\"])" }
                },
                "required": ["query"]
            }
        }
    ])
}

// ---------------------------------------------------------------------------
// Tool handlers
// ---------------------------------------------------------------------------

async fn handle_ripgrep_search(
    ctx: &AppContext,
    args: &serde_json::Value,
) -> (String, bool) {
    let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
        return ("Missing required parameter: pattern".to_string(), true);
    };
    let case_sensitive = args.get("caseSensitive").and_then(|v| v.as_bool()).unwrap_or(false);
    let max_results = args
        .get("maxResults")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_MAX_RESULTS);

    match query::ripgrep_search_all(&ctx.cache, pattern, case_sensitive, max_results).await {
        Ok(results) => {
            let payload = serde_json::json!({ "count": results.len(), "results": results });
            (payload.to_string(), false)
        }
        Err(e) => (e.to_string(), true),
    }
}

async fn handle_embedding_search(
    ctx: &AppContext,
    args: &serde_json::Value,
) -> (String, bool) {
    let Some(query_text) = args.get("query").and_then(|v| v.as_str()) else {
        return ("Missing required parameter: query".to_string(), true);
    };
    let max_results = args
        .get("maxResults")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_MAX_RESULTS);
    let model = args.get("model").and_then(|v| v.as_str());
    let extensions: Vec<String> = args
        .get("extensions")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    match query::semantic_search_all(
        &ctx.cache,
        &ctx.config,
        &ctx.client,
        query_text,
        max_results,
        model,
        &extensions,
    )
    .await
    {
        Ok(results) => {
            let payload = serde_json::json!({ "count": results.len(), "results": results });
            (payload.to_string(), false)
        }
        Err(e) => (e.to_string(), true),
    }
}

async fn handle_tool_call(
    ctx: &AppContext,
    name: &str,
    args: &serde_json::Value,
) -> (String, bool) {
    match name {
        "ripgrep_search" => handle_ripgrep_search(ctx, args).await,
        "embedding_search" => handle_embedding_search(ctx, args).await,
        _ => (format!("Unknown tool: {name}"), true),
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC dispatch
// ---------------------------------------------------------------------------

/// Dispatch a single JSON-RPC message. Returns `None` for notifications.
pub async fn dispatch_jsonrpc(
    ctx: &AppContext,
    msg: &serde_json::Value,
) -> Option<serde_json::Value> {
    let method = msg["method"].as_str().unwrap_or("");
    let id = msg.get("id").cloned();

    // Notifications have no id and produce no response.
    if id.is_none() || method.starts_with("notifications/") {
        return None;
    }

    let response = match method {
        "initialize" => {
            let client_version = msg["params"]["protocolVersion"].as_str().unwrap_or("");
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": negotiate_version(client_version),
                    "capabilities": {
                        "tools": { "listChanged": false }
                    },
                    "serverInfo": {
                        "name": "fathom",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "instructions": "fathom — search the locally indexed folders and repositories. Use ripgrep_search for exact text and identifiers, embedding_search for conceptual queries."
                }
            })
        }
        "tools/list" => {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "tools": tool_definitions() }
            })
        }
        "tools/call" => {
            let tool_name = msg["params"]["name"].as_str().unwrap_or("");
            let arguments =
                msg["params"].get("arguments").cloned().unwrap_or(serde_json::json!({}));
            let (text, is_error) = handle_tool_call(ctx, tool_name, &arguments).await;

            // Errors stay in-band as text so clients can recover without a
            // protocol-level failure.
            let content_text = if is_error { format!("\u{26a0} Error: {text}") } else { text };
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{ "type": "text", "text": content_text }],
                    "isError": false
                }
            })
        }
        "ping" => {
            serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} })
        }
        _ => {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "Method not found" }
            })
        }
    };

    Some(response)
}

// ---------------------------------------------------------------------------
// Stdio server loop
// ---------------------------------------------------------------------------

/// Run the MCP stdio server loop, reading JSON-RPC from stdin and writing
/// responses to stdout.
pub async fn run_mcp(ctx: AppContext) {
    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    let stdout = std::io::stdout();
    let mut initialized = false;

    tracing::info!("MCP server ready");

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                let err = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                });
                let mut out = stdout.lock();
                let _ = writeln!(out, "{err}");
                let _ = out.flush();
                continue;
            }
        };

        let method = msg["method"].as_str().unwrap_or("");

        if method == "notifications/initialized" || method == "notifications/cancelled" {
            continue;
        }

        // Init ordering enforcement: reject non-init requests before initialize.
        if !initialized && method != "initialize" && method != "ping" {
            if let Some(id) = msg.get("id").cloned() {
                let err = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32002,
                        "message": "Server not initialized. Send 'initialize' first."
                    }
                });
                let mut out = stdout.lock();
                let _ = writeln!(out, "{err}");
                let _ = out.flush();
            }
            continue;
        }

        if let Some(response) = dispatch_jsonrpc(&ctx, &msg).await {
            if method == "initialize" {
                initialized = true;
            }
            let mut out = stdout.lock();
            let _ = writeln!(out, "{response}");
            let _ = out.flush();
        }
    }
}
