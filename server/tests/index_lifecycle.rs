//! End-to-end index lifecycle: full build, incremental update, idempotence,
//! and version-guard recovery, against a mock embeddings backend.

mod helpers;

use fathom::codec;
use fathom::config::Config;
use fathom::types::{Index, IndexKind};
use fathom::update;
use std::path::Path;

fn test_config() -> Config {
    // A task-blind model keeps one fragment sequence per chunk, which makes
    // the counts below easy to reason about.
    Config { embedding_model: "test-model".to_string(), ..Config::default() }
}

#[tokio::test]
async fn full_build_then_incremental_update() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("root.flat");

    std::fs::write(root.path().join("a.txt"), "alpha file\nwith two lines\n").unwrap();
    std::fs::write(root.path().join("b.txt"), "bravo file\n").unwrap();

    let config = test_config();
    let client = helpers::mock_client().await;

    // First pass: everything is new.
    let (index, summary) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();
    assert!(summary.changed);
    assert_eq!(summary.added, 2);
    assert_eq!(index.files().len(), 2);
    assert!(matches!(index, Index::Folder(_)), "folder index carries no git fields");
    codec::write_index(&index_path, &index).unwrap();

    let canonical_root = root.path().canonicalize().unwrap();
    let b_key = canonical_root.join("b.txt").to_string_lossy().to_string();
    let old_b_hash = index.files()[&b_key].hash.clone();

    // Mutate the tree: drop a.txt, rewrite b.txt.
    std::fs::remove_file(root.path().join("a.txt")).unwrap();
    std::fs::write(root.path().join("b.txt"), "bravo file, reworked\nnow longer\n").unwrap();

    let (index, summary) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();
    assert!(summary.changed);
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.added, 0);

    let a_key = canonical_root.join("a.txt").to_string_lossy().to_string();
    assert!(!index.files().contains_key(&a_key), "deleted file must leave the index");
    let b = &index.files()[&b_key];
    assert_ne!(b.hash, old_b_hash, "modified file must be re-hashed");
    assert!(!b.fragments.is_empty());
    assert!(b.fragments.iter().all(|f| !f.embedding.is_empty()));
}

#[tokio::test]
async fn second_update_is_idempotent_and_byte_stable() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("root.flat");

    std::fs::write(root.path().join("notes.md"), "# Notes\nsome content here\n").unwrap();

    let config = test_config();
    let client = helpers::mock_client().await;

    let (index, first) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();
    assert!(first.changed);
    codec::write_index(&index_path, &index).unwrap();
    let first_bytes = std::fs::read(&index_path).unwrap();

    // No filesystem changes: the second pass reports unchanged and would
    // serialize to the exact same bytes.
    let (index, second) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();
    assert!(!second.changed, "an untouched tree must not report changes");

    let replay = state.path().join("replay.flat");
    codec::write_index(&replay, &index).unwrap();
    assert_eq!(
        first_bytes,
        std::fs::read(&replay).unwrap(),
        "unchanged index must serialize byte-identically"
    );
}

#[tokio::test]
async fn empty_file_is_represented_by_a_placeholder_fragment() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("root.flat");

    std::fs::write(root.path().join("empty.txt"), "").unwrap();

    let config = test_config();
    let client = helpers::mock_client().await;
    let (index, _) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();

    let record = index.files().values().next().expect("empty file still gets a record");
    assert_eq!(record.fragments.len(), 1);
    let fragment = &record.fragments[0];
    assert_eq!((fragment.start_line, fragment.end_line), (1, 1));
    assert!(fragment.embedding.is_empty());
}

#[tokio::test]
async fn mismatched_version_is_purged_and_rebuilt() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("root.flat");

    std::fs::write(root.path().join("doc.txt"), "content\n").unwrap();

    // Plant an index file with a bogus version header.
    let mut bytes = 999u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(b"stale payload");
    std::fs::write(&index_path, &bytes).unwrap();

    match codec::read_index(&index_path) {
        Err(fathom::Error::VersionMismatch { found, expected, .. }) => {
            assert_eq!(found, 999);
            assert_eq!(expected, codec::INDEX_VERSION);
        }
        other => panic!("expected VersionMismatch, got {other:?}"),
    }
    assert!(!index_path.exists(), "incompatible index must be deleted on read");

    // The updater now sees no index and performs a full build.
    let config = test_config();
    let client = helpers::mock_client().await;
    let (index, summary) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();
    assert!(summary.changed);
    assert_eq!(index.files().len(), 1);
}

#[tokio::test]
async fn filters_apply_during_discovery() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("root.flat");

    std::fs::write(root.path().join("keep.rs"), "fn main() {}\n").unwrap();
    std::fs::write(root.path().join("skip.min.js"), "minified();\n").unwrap();
    std::fs::write(root.path().join("image.png"), [0u8; 8]).unwrap();

    let config = test_config();
    let client = helpers::mock_client().await;
    let (index, _) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();

    let names: Vec<&str> =
        index.files().values().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["keep.rs"]);
}

#[tokio::test]
async fn dual_task_models_index_each_chunk_twice() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("root.flat");

    std::fs::write(root.path().join("doc.txt"), "a short document\n").unwrap();

    let config =
        Config { embedding_model: "embeddinggemma".to_string(), ..Config::default() };
    let client = helpers::mock_client().await;
    let (index, _) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();

    let record = index.files().values().next().unwrap();
    assert_eq!(record.fragments.len(), 2, "one fragment per task over the same range");
    let tasks: Vec<_> = record.fragments.iter().map(|f| f.task).collect();
    assert!(tasks.contains(&fathom::types::EmbeddingTask::RetrievalDocument));
    assert!(tasks.contains(&fathom::types::EmbeddingTask::RetrievalQuery));
    assert_eq!(record.fragments[0].start_line, record.fragments[1].start_line);
}

#[tokio::test]
async fn git_repo_index_records_head_and_dirtiness() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("repo.flat");

    std::fs::write(root.path().join("lib.nim"), "proc hello() =\n  echo \"hi\"\n").unwrap();
    helpers::init_git_repo(root.path());

    let config = test_config();
    let client = helpers::mock_client().await;
    let (index, summary) =
        update::update_index(&index_path, root.path(), IndexKind::GitRepo, &config, &client)
            .await
            .unwrap();
    assert!(summary.changed);

    let Index::GitRepo(repo) = &index else {
        panic!("expected a git-repo index");
    };
    assert_eq!(repo.latest_commit_hash.len(), 40, "full hex commit hash");
    assert!(repo.latest_commit_hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(!repo.is_dirty, "freshly committed tree is clean");
    assert_eq!(repo.name, root.path().file_name().unwrap().to_string_lossy());

    let record = index.files().values().next().unwrap();
    assert_eq!(record.fragments[0].chunk_algorithm, "nim");

    // An untracked file that the filters exclude changes no file record, but
    // it flips the dirty flag — and metadata drift alone is worth writing.
    codec::write_index(&index_path, &index).unwrap();
    std::fs::write(root.path().join("scratch.lock"), "wip\n").unwrap();
    let (index, summary) =
        update::update_index(&index_path, root.path(), IndexKind::GitRepo, &config, &client)
            .await
            .unwrap();
    assert!(summary.changed);
    assert_eq!(summary.added + summary.modified + summary.removed, 0);
    let Index::GitRepo(repo) = &index else { unreachable!() };
    assert!(repo.is_dirty);
}

#[tokio::test]
async fn kind_change_triggers_a_full_rebuild() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("target.flat");

    std::fs::write(root.path().join("f.txt"), "content\n").unwrap();
    helpers::init_git_repo(root.path());

    let config = test_config();
    let client = helpers::mock_client().await;

    // Build as a folder first.
    let (index, _) =
        update::update_index(&index_path, root.path(), IndexKind::Folder, &config, &client)
            .await
            .unwrap();
    codec::write_index(&index_path, &index).unwrap();

    // Requesting a git-repo index at the same path rebuilds from scratch.
    let (index, summary) =
        update::update_index(&index_path, root.path(), IndexKind::GitRepo, &config, &client)
            .await
            .unwrap();
    assert!(summary.changed);
    assert!(matches!(index, Index::GitRepo(_)));
}

#[tokio::test]
async fn git_repo_kind_requires_a_git_directory() {
    helpers::isolate_home();
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("f.txt"), "x\n").unwrap();

    let config = test_config();
    let client = helpers::mock_client().await;
    let outcome =
        update::update_target(root.path(), IndexKind::GitRepo, &config, &client).await;
    assert!(matches!(outcome, Err(fathom::Error::Config(_))));
}

#[tokio::test]
async fn unreadable_root_is_a_config_error() {
    let state = tempfile::tempdir().unwrap();
    let index_path = state.path().join("root.flat");
    let config = test_config();
    let client = helpers::mock_client().await;
    let outcome = update::update_index(
        &index_path,
        Path::new("/nonexistent/fathom-test-root"),
        IndexKind::Folder,
        &config,
        &client,
    )
    .await;
    assert!(matches!(outcome, Err(fathom::Error::Config(_))));
}
