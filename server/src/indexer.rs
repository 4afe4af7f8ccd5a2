//! Full index construction: discovery, include/exclude filtering, chunking,
//! embedding, and assembly.
//!
//! The chunk+hash stage is CPU-bound and runs across files on the rayon
//! pool; the embedding stage is I/O-bound and fans out over a bounded number
//! of concurrent files, with the client capping outgoing HTTP calls.

use crate::chunk::{self, ChunkSpan};
use crate::config::Config;
use crate::embed::{self, EmbeddingClient};
use crate::error::{Error, Result};
use crate::types::{EmbeddingTask, FileRecord, FolderIndex, Fragment, GitRepoIndex, Index, IndexKind};
use futures::StreamExt;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// How many files have embeddings in flight at once. The embedding client
/// separately caps concurrent HTTP calls.
const FILE_EMBED_CONCURRENCY: usize = 4;

// ---------------------------------------------------------------------------
// Hashing and times
// ---------------------------------------------------------------------------

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn system_time_to_unix(time: std::time::SystemTime) -> f64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// `(creation_time, last_modified)` in Unix seconds. Filesystems without a
/// creation time fall back to the modification time.
pub fn file_times(meta: &std::fs::Metadata) -> (f64, f64) {
    let modified = meta.modified().map(system_time_to_unix).unwrap_or(0.0);
    let created = meta.created().map(system_time_to_unix).unwrap_or(modified);
    (created, modified)
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Basename pattern match supporting exactly one `*` wildcard; a pattern
/// without `*` must match literally.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        None => name == pattern,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

/// Lowercased extension with leading dot (`".rs"`), empty when absent.
fn extension_key(path: &Path) -> String {
    path.extension()
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

/// The include/exclude decision for a discovered path: the extension must not
/// be blacklisted, the basename must not match a blacklist pattern, and when
/// the whitelist is non-empty the extension must be present in it.
pub fn should_include(path: &Path, config: &Config) -> bool {
    let ext = extension_key(path);
    if config.blacklist_extensions.iter().any(|e| normalize_ext(e) == ext) {
        return false;
    }

    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if config.blacklist_filenames.iter().any(|p| matches_pattern(filename, p)) {
        return false;
    }

    if !config.whitelist_extensions.is_empty()
        && !config.whitelist_extensions.iter().any(|e| normalize_ext(e) == ext)
    {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Walk the root recursively (parallel walk, hidden entries skipped) and
/// return the sorted set of files passing [`should_include`].
pub fn discover_files(root: &Path, config: &Config) -> Vec<PathBuf> {
    let results: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

    ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .threads(rayon::current_num_threads().min(12))
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return ignore::WalkState::Continue,
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }
                let path = entry.path();
                if should_include(path, config) {
                    results.lock().unwrap().push(path.to_path_buf());
                }
                ignore::WalkState::Continue
            })
        });

    let mut files = results.into_inner().unwrap();
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Per-file pipeline
// ---------------------------------------------------------------------------

/// A file after the CPU-bound stage: hashed, timed, and chunked, with the
/// chunk texts sliced out and ready for embedding.
struct PendingFile {
    path: PathBuf,
    hash: String,
    creation_time: f64,
    last_modified: f64,
    chunks: Vec<(ChunkSpan, String)>,
}

fn slice_lines(lines: &[&str], start_line: u32, end_line: u32) -> String {
    let start = (start_line as usize).saturating_sub(1);
    let end = (end_line as usize).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

/// Read, hash, and chunk one file. Unreadable files abort with `IoError`; no
/// partial record is produced.
fn prepare_file(path: &Path) -> Result<PendingFile> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let (creation_time, last_modified) = file_times(&meta);
    let hash = sha256_hex(&bytes);

    let text = String::from_utf8_lossy(&bytes);
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let spans = chunk::chunk_file(&text, ext);

    let lines: Vec<&str> = text.lines().collect();
    let chunks = spans
        .into_iter()
        .filter_map(|s| {
            let sliced = slice_lines(&lines, s.start_line, s.end_line);
            // Chunks that slice to nothing are skipped outright.
            if sliced.trim().is_empty() {
                None
            } else {
                Some((s, sliced))
            }
        })
        .collect();

    Ok(PendingFile {
        path: path.to_path_buf(),
        hash,
        creation_time,
        last_modified,
        chunks,
    })
}

fn make_fragment(
    span: &ChunkSpan,
    start_line: u32,
    end_line: u32,
    text: &str,
    embedding: Vec<f32>,
    model: &str,
    task: EmbeddingTask,
) -> Fragment {
    Fragment {
        start_line,
        end_line,
        embedding,
        fragment_type: span.fragment_type.to_string(),
        model: model.to_string(),
        chunk_algorithm: span.chunk_algorithm.to_string(),
        task,
        private: false,
        content_score: chunk::content_score(text),
        hash: sha256_hex(text.as_bytes()),
    }
}

/// Embed one chunk, splitting on input-too-long up to the retry depth.
/// Fragments whose retries run out, or that hit a non-splittable error, are
/// skipped; the file keeps its other fragments.
async fn embed_chunk(
    client: &EmbeddingClient,
    model: &str,
    task: EmbeddingTask,
    span: &ChunkSpan,
    text: &str,
) -> Vec<Fragment> {
    let mut work: Vec<(String, u32, u32, usize)> =
        vec![(text.to_string(), span.start_line, span.end_line, 0)];
    let mut fragments = Vec::new();

    while let Some((part, start, end, depth)) = work.pop() {
        match client.embed(&part, model, task).await {
            Ok(vector) => {
                fragments.push(make_fragment(span, start, end, &part, vector, model, task));
            }
            Err(Error::InputTooLong(_)) if depth < chunk::SPLIT_RETRY_DEPTH => {
                match chunk::split_for_retry(&part, start, end) {
                    Ok([(a, s1, e1), (b, s2, e2)]) => {
                        work.push((b, s2, e2, depth + 1));
                        work.push((a, s1, e1, depth + 1));
                    }
                    Err(e) => {
                        warn!(algorithm = span.chunk_algorithm, error = %e, "Unsplittable oversized fragment skipped");
                    }
                }
            }
            Err(e) => {
                warn!(range = %format!("[{start},{end}]"), error = %e, "Fragment embedding failed, skipping");
            }
        }
    }

    fragments.sort_by_key(|f| (f.start_line, f.end_line));
    fragments
}

/// Embed every chunk of a prepared file and assemble its record. The batched
/// call is the fast path; an input-too-long batch falls back to per-chunk
/// calls with split retries. Any other batch failure fails the whole file.
async fn build_file_record(
    pending: PendingFile,
    client: &EmbeddingClient,
    model: &str,
) -> Result<FileRecord> {
    let filename = pending
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let path_str = pending.path.to_string_lossy().to_string();

    let mut fragments: Vec<Fragment> = Vec::new();

    let texts: Vec<String> = pending.chunks.iter().map(|(_, t)| t.clone()).collect();
    for task in embed::tasks_for_model(model) {
        match client.embed_batch(&texts, model, task).await {
            Ok(vectors) => {
                for ((span, text), vector) in pending.chunks.iter().zip(vectors) {
                    fragments.push(make_fragment(
                        span,
                        span.start_line,
                        span.end_line,
                        text,
                        vector,
                        model,
                        task,
                    ));
                }
            }
            Err(Error::InputTooLong(_)) => {
                for (span, text) in &pending.chunks {
                    fragments.extend(embed_chunk(client, model, task, span, text).await);
                }
            }
            Err(e) => return Err(e),
        }
    }
    fragments.sort_by_key(|f| f.start_line);

    // A file with nothing embeddable (empty, or every fragment skipped) is
    // still represented by a single empty fragment.
    if fragments.is_empty() {
        fragments.push(Fragment {
            start_line: 1,
            end_line: 1,
            embedding: Vec::new(),
            fragment_type: "document".to_string(),
            model: model.to_string(),
            chunk_algorithm: "simple".to_string(),
            task: embed::document_task_for(model),
            private: false,
            content_score: 0,
            hash: sha256_hex(b""),
        });
    }

    Ok(FileRecord {
        path: path_str,
        filename,
        hash: pending.hash,
        creation_time: pending.creation_time,
        last_modified: pending.last_modified,
        fragments,
    })
}

/// Rebuild the record for a single file: chunk+hash, then embed.
pub async fn index_file(
    path: &Path,
    client: &EmbeddingClient,
    model: &str,
) -> Result<FileRecord> {
    let pending = prepare_file(path)?;
    build_file_record(pending, client, model).await
}

// ---------------------------------------------------------------------------
// Git metadata
// ---------------------------------------------------------------------------

/// `(latest_commit_hash, is_dirty)` for a repository root. Failures fall back
/// to `"unknown"` and `dirty = true` so a broken repo never blocks indexing.
pub fn repo_metadata(root: &Path) -> (String, bool) {
    let repo = match git2::Repository::open(root) {
        Ok(r) => r,
        Err(_) => return ("unknown".to_string(), true),
    };

    let hash = repo
        .head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok())
        .map(|commit| commit.id().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true);
    let dirty = match repo.statuses(Some(&mut opts)) {
        Ok(statuses) => !statuses.is_empty(),
        Err(_) => true,
    };

    (hash, dirty)
}

// ---------------------------------------------------------------------------
// Full build
// ---------------------------------------------------------------------------

/// Build a complete index for a root. Per-file failures are logged and the
/// file skipped; discovery and filtering follow the configured lists.
pub async fn build_index(
    root: &Path,
    kind: IndexKind,
    config: &Config,
    client: &EmbeddingClient,
) -> Result<Index> {
    let root = root
        .canonicalize()
        .map_err(|e| Error::Config(format!("{}: {e}", root.display())))?;

    let paths = discover_files(&root, config);

    // CPU-bound stage on the rayon pool.
    let prepared: Vec<Result<PendingFile>> =
        paths.par_iter().map(|p| prepare_file(p)).collect();

    let mut pendings = Vec::with_capacity(prepared.len());
    for result in prepared {
        match result {
            Ok(p) => pendings.push(p),
            Err(e) => warn!(error = %e, "Skipping unreadable file"),
        }
    }

    // I/O-bound stage: bounded concurrent embedding per file.
    let model = config.embedding_model.as_str();
    let records: Vec<Result<FileRecord>> = futures::stream::iter(pendings)
        .map(|pending| {
            let client = client.clone();
            async move { build_file_record(pending, &client, model).await }
        })
        .buffer_unordered(FILE_EMBED_CONCURRENCY)
        .collect()
        .await;

    let mut files = BTreeMap::new();
    for result in records {
        match result {
            Ok(record) => {
                files.insert(record.path.clone(), record);
            }
            Err(e) => warn!(error = %e, "File failed to embed, leaving it out of this pass"),
        }
    }

    let root_str = root.to_string_lossy().to_string();
    Ok(match kind {
        IndexKind::Folder => Index::Folder(FolderIndex { path: root_str, files }),
        IndexKind::GitRepo => {
            let (latest_commit_hash, is_dirty) = repo_metadata(&root);
            let name = root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("repo")
                .to_string();
            Index::GitRepo(GitRepoIndex {
                path: root_str,
                files,
                name,
                latest_commit_hash,
                is_dirty,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching_single_star() {
        assert!(matches_pattern("app.min.js", "*.min.js"));
        assert!(matches_pattern("package-lock.json", "package-lock.json"));
        assert!(!matches_pattern("app.js", "*.min.js"));
        assert!(matches_pattern("test_helpers.py", "test_*"));
        assert!(!matches_pattern("helpers.py", "test_*"));
        // The star may match the empty string.
        assert!(matches_pattern("test_", "test_*"));
    }

    #[test]
    fn include_filter_honors_black_and_whitelists() {
        let mut config = Config::default();
        config.blacklist_extensions = vec![".png".into()];
        config.blacklist_filenames = vec!["*.min.js".into()];

        assert!(should_include(Path::new("/p/src/main.rs"), &config));
        assert!(!should_include(Path::new("/p/logo.png"), &config));
        assert!(!should_include(Path::new("/p/dist/app.min.js"), &config));

        config.whitelist_extensions = vec![".rs".into(), ".md".into()];
        assert!(should_include(Path::new("/p/src/main.rs"), &config));
        assert!(should_include(Path::new("/p/README.md"), &config));
        assert!(!should_include(Path::new("/p/script.py"), &config));
    }

    #[test]
    fn extension_comparison_is_case_insensitive_and_dot_normalized() {
        let mut config = Config::default();
        config.blacklist_extensions = vec!["PNG".into()];
        assert!(!should_include(Path::new("/p/logo.png"), &config));
        assert!(!should_include(Path::new("/p/logo.PNG"), &config));
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("skip.png"), [0u8; 4]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "c").unwrap();

        let mut config = Config::default();
        config.blacklist_extensions = vec![".png".into()];

        let found = discover_files(dir.path(), &config);
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn slice_lines_is_inclusive() {
        let lines = vec!["one", "two", "three"];
        assert_eq!(slice_lines(&lines, 1, 2), "one\ntwo");
        assert_eq!(slice_lines(&lines, 3, 3), "three");
        assert_eq!(slice_lines(&lines, 2, 99), "two\nthree");
        assert_eq!(slice_lines(&lines, 5, 6), "");
    }

    #[test]
    fn prepare_file_hashes_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        std::fs::write(&path, "# Title\nbody text\n").unwrap();

        let pending = prepare_file(&path).unwrap();
        assert_eq!(pending.hash, sha256_hex(b"# Title\nbody text\n"));
        assert_eq!(pending.chunks.len(), 1);
        assert_eq!(pending.chunks[0].0.chunk_algorithm, "markdown");
        assert!(pending.last_modified > 0.0);
    }

    #[test]
    fn repo_metadata_falls_back_outside_git() {
        let dir = tempfile::tempdir().unwrap();
        let (hash, dirty) = repo_metadata(dir.path());
        assert_eq!(hash, "unknown");
        assert!(dirty);
    }
}
