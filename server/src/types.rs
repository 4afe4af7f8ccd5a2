use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// Embedding tasks
// ---------------------------------------------------------------------------

/// Role an embedding plays at query time.
///
/// `RetrievalDocument` vectors sit on the indexed corpus side,
/// `RetrievalQuery` on the query side (asymmetric retrieval), and
/// `SemanticSimilarity` is the symmetric task used by models without a task
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingTask {
    RetrievalDocument,
    RetrievalQuery,
    SemanticSimilarity,
}

impl EmbeddingTask {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetrievalDocument => "retrieval_document",
            Self::RetrievalQuery => "retrieval_query",
            Self::SemanticSimilarity => "semantic_similarity",
        }
    }
}

impl std::fmt::Display for EmbeddingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fragments and file records
// ---------------------------------------------------------------------------

/// A contiguous, 1-based, inclusive line range of a single file with an
/// attached embedding. The fragment never stores the text itself; callers
/// slice lines by range when they need it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub start_line: u32,
    pub end_line: u32,
    /// Empty until an embedding is attached; otherwise its length is the
    /// dimension fixed by `model`.
    pub embedding: Vec<f32>,
    /// Free-form tag: `"document"`, `"markdown_section"`, `"nim_block"`.
    pub fragment_type: String,
    /// Embedding model identifier the vector was produced with.
    pub model: String,
    /// `"simple"`, `"markdown"` or `"nim"`.
    pub chunk_algorithm: String,
    pub task: EmbeddingTask,
    /// Reserved.
    pub private: bool,
    /// 0–100 heuristic of how much prose-like content the fragment holds.
    pub content_score: u8,
    /// SHA-256 hex of the fragment's text.
    pub hash: String,
}

/// One tracked file inside an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path.
    pub path: String,
    /// Basename.
    pub filename: String,
    /// SHA-256 hex of the full file bytes.
    pub hash: String,
    /// Unix seconds.
    pub creation_time: f64,
    /// Unix seconds. The optimistic fast path for change detection; the hash
    /// is authoritative.
    pub last_modified: f64,
    /// Ordered by `start_line`.
    pub fragments: Vec<Fragment>,
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Folder,
    GitRepo,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Folder => f.write_str("folder"),
            Self::GitRepo => f.write_str("git-repo"),
        }
    }
}

/// Index over a plain folder.
///
/// `files` is keyed by absolute path. `BTreeMap` keeps iteration (and thus
/// the serialized byte stream) sorted, which the golden-file tests rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderIndex {
    pub path: String,
    pub files: BTreeMap<String, FileRecord>,
}

/// Index over a git repository: folder attributes plus advisory git metadata
/// refreshed on every update. The index is not tied to a specific commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitRepoIndex {
    pub path: String,
    pub files: BTreeMap<String, FileRecord>,
    /// Basename of the repository.
    pub name: String,
    /// 40-char hex, or `"unknown"` when HEAD cannot be resolved.
    pub latest_commit_hash: String,
    /// Uncommitted changes present. Errors reading status report dirty.
    pub is_dirty: bool,
}

/// A loaded index. The folder/git-repo distinction is a tagged variant, not
/// inheritance; matching on the tag picks the right `files` map and the
/// optional git metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Index {
    Folder(FolderIndex),
    GitRepo(GitRepoIndex),
}

impl Index {
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Folder(_) => IndexKind::Folder,
            Self::GitRepo(_) => IndexKind::GitRepo,
        }
    }

    /// Root path the index was built from.
    pub fn path(&self) -> &str {
        match self {
            Self::Folder(f) => &f.path,
            Self::GitRepo(r) => &r.path,
        }
    }

    pub fn files(&self) -> &BTreeMap<String, FileRecord> {
        match self {
            Self::Folder(f) => &f.files,
            Self::GitRepo(r) => &r.files,
        }
    }

    pub fn files_mut(&mut self) -> &mut BTreeMap<String, FileRecord> {
        match self {
            Self::Folder(f) => &mut f.files,
            Self::GitRepo(r) => &mut r.files,
        }
    }

    pub fn fragment_count(&self) -> usize {
        self.files().values().map(|f| f.fragments.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Server-side loaded-index cache
// ---------------------------------------------------------------------------

struct CachedIndex {
    modified: SystemTime,
    index: Arc<Index>,
}

/// Cache of indexes loaded from disk, keyed by index-file path and
/// invalidated by file mtime. Shared by the HTTP and MCP adapters so repeated
/// queries do not re-deserialize unchanged `.flat` files.
#[derive(Default)]
pub struct IndexCache {
    entries: DashMap<PathBuf, CachedIndex>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Load an index file through the cache. Returns `None` when the file is
    /// unreadable or incompatible (an incompatible file has already been
    /// purged by the codec and will be rebuilt by the next update pass).
    pub fn load(&self, path: &Path) -> Option<Arc<Index>> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;

        if let Some(hit) = self.entries.get(path) {
            if hit.modified == modified {
                return Some(Arc::clone(&hit.index));
            }
        }

        match crate::codec::read_index(path) {
            Ok(index) => {
                let index = Arc::new(index);
                self.entries.insert(
                    path.to_path_buf(),
                    CachedIndex { modified, index: Arc::clone(&index) },
                );
                Some(index)
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable index");
                self.entries.remove(path);
                None
            }
        }
    }
}
