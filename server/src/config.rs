//! Configuration: `~/.fathom/config.json`, index-file path conventions, and
//! API key generation.
//!
//! The config file is loaded on demand and is effectively immutable for the
//! duration of a process. Missing scalar keys are regenerated with defaults
//! and the file rewritten; missing target paths are reported when a target is
//! actually used.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under `$HOME` holding config and index files.
pub const APP_DIR: &str = ".fathom";

/// Extension of on-disk index files.
pub const INDEX_FILE_EXT: &str = "flat";

// ---------------------------------------------------------------------------
// Config model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Informational only.
    pub version: String,
    /// Folder targets for index-all / watch. Absolute paths.
    pub folders: Vec<String>,
    /// Git repository targets. Each must contain a `.git`.
    pub git_repos: Vec<String>,
    /// When non-empty, only these extensions (with leading dot) are indexed.
    pub whitelist_extensions: Vec<String>,
    /// Always excluded extensions.
    pub blacklist_extensions: Vec<String>,
    /// Basename patterns with a single `*` wildcard, always excluded.
    pub blacklist_filenames: Vec<String>,
    /// Default model for build and query.
    pub embedding_model: String,
    /// OpenAI-compatible embeddings endpoint.
    pub api_base_url: String,
    /// Bearer token for the embedding endpoint and for the HTTP/MCP servers.
    pub api_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            folders: Vec::new(),
            git_repos: Vec::new(),
            whitelist_extensions: Vec::new(),
            blacklist_extensions: [
                ".lock", ".bin", ".ico", ".png", ".jpg", ".jpeg", ".gif", ".webp", ".pdf",
                ".zip", ".gz", ".tar", ".exe", ".dll", ".so", ".dylib", ".o", ".a", ".class",
                ".jar", ".woff", ".woff2", ".ttf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            blacklist_filenames: ["*.min.js", "*.min.css", "package-lock.json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            embedding_model: "embeddinggemma".to_string(),
            api_base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// `apiBaseUrl` with the environment override applied.
    /// `OPENAI_API_BASE_URL` wins over `OPENAI_BASE_URL`; neither is persisted.
    pub fn effective_api_base_url(&self) -> String {
        std::env::var("OPENAI_API_BASE_URL")
            .or_else(|_| std::env::var("OPENAI_BASE_URL"))
            .unwrap_or_else(|_| self.api_base_url.clone())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `~/.fathom`. `FATHOM_HOME` overrides the location wholesale (used by the
/// integration tests and by setups with a relocated home).
pub fn app_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("FATHOM_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .ok_or_else(|| Error::Config("HOME is not set".to_string()))?;
    Ok(PathBuf::from(home).join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(app_dir()?.join("config.json"))
}

/// Directory holding folder indexes.
pub fn folders_dir() -> Result<PathBuf> {
    Ok(app_dir()?.join("folders"))
}

/// Directory holding git-repo indexes.
pub fn repos_dir() -> Result<PathBuf> {
    Ok(app_dir()?.join("repos"))
}

/// Replace path separators so a full path becomes a flat file name.
pub fn sanitize_index_name(path: &str) -> String {
    path.replace(['/', '\\'], "_")
}

/// `~/.fathom/folders/<sanitized-folder-path>.flat`
pub fn folder_index_path(folder: &Path) -> Result<PathBuf> {
    let name = sanitize_index_name(&folder.to_string_lossy());
    Ok(folders_dir()?.join(format!("{name}.{INDEX_FILE_EXT}")))
}

/// `~/.fathom/repos/<repo-basename>.flat`
pub fn repo_index_path(repo: &Path) -> Result<PathBuf> {
    let name = repo
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| sanitize_index_name(&repo.to_string_lossy()));
    Ok(repos_dir()?.join(format!("{name}.{INDEX_FILE_EXT}")))
}

/// All index files currently on disk, folders first, sorted within each kind.
pub fn index_files() -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for dir in [folders_dir()?, repos_dir()?] {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        let mut batch: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(INDEX_FILE_EXT))
            .collect();
        batch.sort();
        out.extend(batch);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Generate a fresh API key for new installs.
pub fn generate_api_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Load the config file, creating it with defaults on first run. A missing
/// `apiKey` is generated and written back; other missing scalars fall back to
/// defaults via serde.
pub fn load_or_init() -> Result<Config> {
    let path = config_path()?;
    let mut config = match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str::<Config>(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(Error::io(path, e)),
    };

    if config.api_key.is_empty() {
        config.api_key = generate_api_key();
        save(&config)?;
    }
    Ok(config)
}

/// Write the config file (pretty JSON), creating `~/.fathom` if needed.
pub fn save(config: &Config) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let raw = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("serialize config: {e}")))?;
    std::fs::write(&path, raw).map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "folders": ["/tmp/a"] }"#).unwrap();
        assert_eq!(config.folders, vec!["/tmp/a".to_string()]);
        assert_eq!(config.embedding_model, "embeddinggemma");
        assert!(config.git_repos.is_empty());
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn camel_case_keys_round_trip() {
        let config = Config {
            git_repos: vec!["/src/repo".into()],
            whitelist_extensions: vec![".rs".into()],
            ..Config::default()
        };
        let raw = serde_json::to_string(&config).unwrap();
        assert!(raw.contains("\"gitRepos\""), "expected camelCase keys: {raw}");
        assert!(raw.contains("\"whitelistExtensions\""));
        let back: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.git_repos, config.git_repos);
    }

    #[test]
    fn sanitize_flattens_separators() {
        assert_eq!(sanitize_index_name("/home/dev/notes"), "_home_dev_notes");
        assert_eq!(sanitize_index_name(r"C:\src\notes"), "C:_src_notes");
    }
}
