//! Incremental index updates.
//!
//! Keeps an on-disk index in sync with a mutating file tree: load the prior
//! state, diff against the filesystem (mtime as the optimistic fast path,
//! SHA-256 as the authority), re-chunk and re-embed only what changed, and
//! skip the write entirely when nothing did — byte-stable output is a
//! correctness requirement, not an optimization.

use crate::codec;
use crate::config::{self, Config};
use crate::embed::EmbeddingClient;
use crate::error::{Error, Result};
use crate::indexer;
use crate::types::{FileRecord, Index, IndexKind};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

/// Whether a stored record is stale for the file currently on disk. A newer
/// mtime answers immediately without hashing; otherwise the content hash
/// decides — equal mtimes alone are not proof of an unchanged file.
pub fn needs_reindexing(record: &FileRecord, path: &Path) -> Result<bool> {
    let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let (_, last_modified) = indexer::file_times(&meta);
    if last_modified > record.last_modified {
        return Ok(true);
    }
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(indexer::sha256_hex(&bytes) != record.hash)
}

// ---------------------------------------------------------------------------
// Update result
// ---------------------------------------------------------------------------

/// Per-target outcome of an update pass.
#[derive(Debug, Clone, Default)]
pub struct UpdateSummary {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    /// Fragments in the index after the pass.
    pub fragments: usize,
    /// When false the caller must not write the index back.
    pub changed: bool,
}

impl std::fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} modified, {} removed, {} fragments",
            self.added, self.modified, self.removed, self.fragments
        )
    }
}

// ---------------------------------------------------------------------------
// Core update algorithm
// ---------------------------------------------------------------------------

/// Bring the index at `index_path` in sync with `root`. Any load failure —
/// missing file, corrupt payload, version mismatch (the codec already deleted
/// the file), or a kind that does not match — falls back to a full build.
pub async fn update_index(
    index_path: &Path,
    root: &Path,
    kind: IndexKind,
    config: &Config,
    client: &EmbeddingClient,
) -> Result<(Index, UpdateSummary)> {
    let root = root
        .canonicalize()
        .map_err(|e| Error::Config(format!("{}: {e}", root.display())))?;

    let loaded = match codec::read_index(index_path) {
        Ok(index) if index.kind() == kind => Some(index),
        Ok(index) => {
            warn!(
                file = %index_path.display(),
                stored = %index.kind(),
                requested = %kind,
                "Index kind changed, rebuilding from scratch"
            );
            None
        }
        Err(e) => {
            if !matches!(&e, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
            {
                warn!(file = %index_path.display(), error = %e, "Could not load index, rebuilding from scratch");
            }
            None
        }
    };

    let Some(mut index) = loaded else {
        let index = indexer::build_index(&root, kind, config, client).await?;
        let summary = UpdateSummary {
            added: index.files().len(),
            modified: 0,
            removed: 0,
            fragments: index.fragment_count(),
            changed: true,
        };
        return Ok((index, summary));
    };

    // Diff the stored file set against the filesystem.
    let discovered = indexer::discover_files(&root, config);
    let on_disk: BTreeSet<String> = discovered
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();

    let stale: Vec<String> = index
        .files()
        .keys()
        .filter(|path| !on_disk.contains(*path))
        .cloned()
        .collect();

    let mut to_update: Vec<PathBuf> = Vec::new();
    for path in &discovered {
        let key = path.to_string_lossy().to_string();
        match index.files().get(&key) {
            None => to_update.push(path.clone()),
            Some(record) => match needs_reindexing(record, path) {
                Ok(true) => to_update.push(path.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Change detection failed, re-indexing file");
                    to_update.push(path.clone());
                }
            },
        }
    }

    let removed = stale.len();
    for path in &stale {
        index.files_mut().remove(path);
    }

    // Rebuild each marked file. A failure keeps the old record (if any) so a
    // single bad file never poisons the index.
    let model = config.embedding_model.as_str();
    let mut added = 0usize;
    let mut modified = 0usize;
    for path in &to_update {
        let key = path.to_string_lossy().to_string();
        match indexer::index_file(path, client, model).await {
            Ok(record) => {
                if index.files_mut().insert(key, record).is_some() {
                    modified += 1;
                } else {
                    added += 1;
                }
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "File update failed, keeping previous state");
            }
        }
    }

    // Git metadata is advisory and refreshed unconditionally.
    let mut metadata_changed = false;
    if let Index::GitRepo(repo) = &mut index {
        let (hash, dirty) = indexer::repo_metadata(&root);
        metadata_changed = repo.latest_commit_hash != hash || repo.is_dirty != dirty;
        repo.latest_commit_hash = hash;
        repo.is_dirty = dirty;
    }

    let summary = UpdateSummary {
        added,
        modified,
        removed,
        fragments: index.fragment_count(),
        changed: added > 0 || modified > 0 || removed > 0 || metadata_changed,
    };
    Ok((index, summary))
}

/// Update one target and persist the result when (and only when) it changed.
pub async fn update_target(
    root: &Path,
    kind: IndexKind,
    config: &Config,
    client: &EmbeddingClient,
) -> Result<UpdateSummary> {
    if kind == IndexKind::GitRepo && !root.join(".git").exists() {
        return Err(Error::Config(format!(
            "{} is not a git repository (no .git)",
            root.display()
        )));
    }

    let index_path = match kind {
        IndexKind::Folder => config::folder_index_path(root)?,
        IndexKind::GitRepo => config::repo_index_path(root)?,
    };

    let (index, summary) = update_index(&index_path, root, kind, config, client).await?;
    if summary.changed {
        codec::write_index(&index_path, &index)?;
        info!(target = %root.display(), kind = %kind, %summary, "Index written");
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// All configured targets
// ---------------------------------------------------------------------------

/// One entry per configured target, in config order, folders first. Errors
/// are isolated per target so one broken root never stops the rest.
pub async fn index_all_targets(
    config: &Config,
    client: &EmbeddingClient,
) -> Vec<(String, IndexKind, Result<UpdateSummary>)> {
    let mut results = Vec::new();
    for folder in &config.folders {
        let outcome =
            update_target(Path::new(folder), IndexKind::Folder, config, client).await;
        results.push((folder.clone(), IndexKind::Folder, outcome));
    }
    for repo in &config.git_repos {
        let outcome =
            update_target(Path::new(repo), IndexKind::GitRepo, config, client).await;
        results.push((repo.clone(), IndexKind::GitRepo, outcome));
    }
    results
}
