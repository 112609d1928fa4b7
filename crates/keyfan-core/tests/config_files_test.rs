//! Loading configuration, tables, and root secrets from disk.

use keyfan_core::config::{load_root_secrets, load_tables, KeyfanConfig, LabelTables};
use keyfan_core::KeyfanError;
use tempfile::TempDir;

#[test]
fn load_config_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("keyfan.toml");
    std::fs::write(
        &path,
        "[hierarchy]\ncompanies = 2\ndepartments = 2\nunits = 3\n\n[paths]\ninput_dir = \"in\"\n",
    )
    .unwrap();

    let config = KeyfanConfig::load(&path).unwrap();
    assert_eq!(config.shape().unwrap().leaf_count(), 12);
    assert_eq!(config.paths.input_dir, std::path::PathBuf::from("in"));
}

#[test]
fn malformed_config_names_the_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.toml");
    std::fs::write(&path, "[hierarchy\ncompanies = ").unwrap();

    match KeyfanConfig::load(&path) {
        Err(KeyfanError::Config(msg)) => assert!(msg.contains("broken.toml")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn missing_config_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let err = KeyfanConfig::load(&tmp.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, KeyfanError::Io(_)));
}

#[test]
fn tables_and_secrets_from_disk() {
    let tmp = TempDir::new().unwrap();
    let tables_path = tmp.path().join("labels_contexts.toml");
    let secrets_path = tmp.path().join("company_keys.txt");

    std::fs::write(&tables_path, LabelTables::placeholder(2, 5).to_toml().unwrap()).unwrap();
    std::fs::write(
        &secrets_path,
        "QRm9yuXDi2kfRJkxR6hyAUaNw7OV7OTu\nQ1H3IjqprpMp3vPbQBMwULv9WUhReXT7\n",
    )
    .unwrap();

    let tables = load_tables(&tables_path).unwrap();
    assert_eq!(tables.departments.len(), 2);
    assert_eq!(tables.units.len(), 5);
    assert_eq!(tables.departments[1].context, b"Context department 1".to_vec());

    let secrets = load_root_secrets(&secrets_path).unwrap();
    assert_eq!(secrets.len(), 2);
    assert_eq!(secrets[1].expose(), b"Q1H3IjqprpMp3vPbQBMwULv9WUhReXT7");
}
