#![forbid(unsafe_code)]

use marketmesh::config::NodeConfig;
use std::fs;

#[test]
fn loads_a_partial_toml_file_and_fills_in_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
data_dir = "./custom-data"

[p2p]
port = 4500
min_voters = 5
"#,
    )
    .unwrap();

    let cfg = NodeConfig::load(&path).unwrap();
    assert_eq!(cfg.data_dir, "./custom-data");
    assert_eq!(cfg.p2p.port, 4500);
    assert_eq!(cfg.p2p.min_voters, 5);
    // Untouched fields keep their defaults.
    assert_eq!(cfg.p2p.max_peers, 50);
    assert_eq!(cfg.security.min_reputation, 0.5);
}

#[test]
fn missing_file_is_an_io_error() {
    let err = NodeConfig::load(std::path::Path::new("/nonexistent/path/config.toml"));
    assert!(err.is_err());
}

#[test]
fn invalid_toml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "this is not valid toml ===").unwrap();
    assert!(NodeConfig::load(&path).is_err());
}
