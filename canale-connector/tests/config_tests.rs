//! Behavioural tests for configuration loading.

use canale_connector::config::{CollectionConfig, Config, ConfigError};

fn no_env(_key: &str) -> Option<String> {
    None
}

const FULL_YAML: &str = r#"
connector:
  log:
    level: debug
  mongo:
    uri: mongodb://localhost:27017
  nats:
    url: nats://localhost:4222
  server:
    addr: 127.0.0.1:8080
  collections:
    - dbName: test-connector
      collName: coll1
      changeStreamPreAndPostImages: true
      tokensDbName: resume-tokens
      tokensCollName: coll1
      tokensCollCapped: true
      tokensCollSizeInBytes: 4096
      streamName: COLL1
    - dbName: test-connector
      collName: coll2
"#;

#[test]
fn test_parse_full_yaml_tree() {
    let mut cfg: Config = serde_yaml::from_str(FULL_YAML).unwrap();
    cfg.resolve_with(no_env).unwrap();

    assert_eq!(cfg.connector.log.level, "debug");
    assert_eq!(cfg.connector.mongo.uri, "mongodb://localhost:27017");
    assert_eq!(cfg.connector.nats.url, "nats://localhost:4222");
    assert_eq!(cfg.connector.server.addr, "127.0.0.1:8080");
    assert_eq!(cfg.connector.collections.len(), 2);

    let explicit = &cfg.connector.collections[0];
    assert_eq!(explicit.db_name, "test-connector");
    assert_eq!(explicit.coll_name, "coll1");
    assert_eq!(explicit.change_stream_pre_and_post_images, Some(true));
    assert_eq!(explicit.tokens_coll_capped, Some(true));
    assert_eq!(explicit.tokens_coll_size_in_bytes, Some(4096));
    assert_eq!(explicit.stream_name, "COLL1");

    let defaulted = &cfg.connector.collections[1];
    assert_eq!(defaulted.change_stream_pre_and_post_images, Some(false));
    assert_eq!(defaulted.tokens_db_name, "resume-tokens");
    assert_eq!(defaulted.tokens_coll_name, "coll2");
    assert_eq!(defaulted.tokens_coll_capped, Some(true));
    assert_eq!(defaulted.tokens_coll_size_in_bytes, Some(4096));
    assert_eq!(defaulted.stream_name, "COLL2");
}

#[test]
fn test_missing_collection_fields_fail_startup() {
    let yaml = r#"
connector:
  collections:
    - collName: coll1
"#;
    let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();

    assert!(matches!(
        cfg.resolve_with(no_env),
        Err(ConfigError::MissingDbName)
    ));
}

#[test]
fn test_roundtrip_export_is_stable() {
    let mut cfg: Config = serde_yaml::from_str(FULL_YAML).unwrap();
    cfg.resolve_with(no_env).unwrap();

    // Export, reload, resolve again: the tree must not drift.
    let exported = serde_yaml::to_string(&cfg).unwrap();
    let mut reloaded: Config = serde_yaml::from_str(&exported).unwrap();
    reloaded.resolve_with(no_env).unwrap();

    assert_eq!(reloaded, cfg);
}

#[test]
fn test_empty_collections_list_is_valid() {
    let yaml = r#"
connector:
  mongo:
    uri: mongodb://localhost:27017
"#;
    let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
    cfg.resolve_with(no_env).unwrap();

    assert!(cfg.connector.collections.is_empty());
    assert_eq!(cfg.connector.log.level, "info");
}

#[test]
fn test_config_file_env_selects_the_file() {
    // CONFIG_FILE is consumed by the binary's flag parsing; the loader only
    // cares that the file content round-trips.
    let dir = std::env::temp_dir().join("canale-config-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("connector.yaml");
    std::fs::write(&path, FULL_YAML).unwrap();

    let mut cfg = Config::load(&path).unwrap();
    cfg.resolve_with(no_env).unwrap();
    assert_eq!(cfg.connector.collections.len(), 2);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_collection_config_default_is_empty() {
    let coll = CollectionConfig::default();
    assert!(coll.db_name.is_empty());
    assert!(coll.tokens_coll_capped.is_none());
}
