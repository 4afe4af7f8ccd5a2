//! Config file lifecycle against an isolated home directory.

mod helpers;

use fathom::config;

#[test]
fn first_load_creates_config_with_generated_key() {
    helpers::isolate_home();

    let config = config::load_or_init().unwrap();
    assert!(!config.api_key.is_empty(), "a missing apiKey is generated");
    assert!(config::config_path().unwrap().exists());

    // A second load round-trips the same key instead of regenerating it.
    let again = config::load_or_init().unwrap();
    assert_eq!(again.api_key, config.api_key);

    // Mutations persist.
    let mut mutated = again.clone();
    mutated.folders.push("/tmp/somewhere".to_string());
    config::save(&mutated).unwrap();
    let reloaded = config::load_or_init().unwrap();
    assert_eq!(reloaded.folders, vec!["/tmp/somewhere".to_string()]);

    // The raw file speaks the camelCase wire format.
    let raw = std::fs::read_to_string(config::config_path().unwrap()).unwrap();
    assert!(raw.contains("\"apiKey\""));
    assert!(raw.contains("\"embeddingModel\""));

    // Index paths live under the same app dir, split by kind.
    let folder_index =
        config::folder_index_path(std::path::Path::new("/tmp/somewhere")).unwrap();
    assert!(folder_index.ends_with("folders/_tmp_somewhere.flat"));
    let repo_index = config::repo_index_path(std::path::Path::new("/src/myrepo")).unwrap();
    assert!(repo_index.ends_with("repos/myrepo.flat"));
}
