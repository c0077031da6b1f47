use maintenance_core::config::*;
use std::fs;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.database.url, "sqlite://maintenance.db");
    assert_eq!(config.engine.tick_interval_seconds, 30);
    assert_eq!(config.cluster.cql_port, 9142);
    assert_eq!(config.cluster.gossip_port, 7100);
    assert_eq!(config.schema.keyspaces.len(), 2);
    assert_eq!(config.schema.metrics_keyspace, "rhq");
    assert_eq!(config.observability.log_format, LogFormat::Pretty);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite::memory:"
max_connections = 2
min_connections = 1
connection_timeout_seconds = 10

[engine]
enabled = true
tick_interval_seconds = 5

[cluster]
cql_port = 9042
gossip_port = 7000

[observability]
log_level = "debug"
log_format = "json"
metrics_enabled = false
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.engine.tick_interval_seconds, 5);
    assert_eq!(config.cluster.cql_port, 9042);
    assert_eq!(config.observability.log_format, LogFormat::Json);
    // 未配置的部分使用默认值
    assert_eq!(config.schema, SchemaConfig::default());
}

#[test]
fn test_config_validation_rejects_invalid_values() {
    let mut config = AppConfig::default();
    config.engine.tick_interval_seconds = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.database.min_connections = 10;
    config.database.max_connections = 2;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.cluster.gossip_port = config.cluster.cql_port;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.schema.keyspaces[0].tables.clear();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.schema.metrics_keyspace = "missing".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.database.url = "postgresql://localhost/maintenance".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_load_from_file() {
    let toml_content = r#"
[engine]
enabled = false
tick_interval_seconds = 12

[cluster]
cql_port = 9043
gossip_port = 7001
"#;
    let file = NamedTempFile::new().unwrap();
    fs::write(file.path(), toml_content).unwrap();

    let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
    assert!(!config.engine.enabled);
    assert_eq!(config.engine.tick_interval_seconds, 12);
    assert_eq!(config.cluster.cql_port, 9043);
    assert_eq!(config.cluster.gossip_port, 7001);
    assert_eq!(config.database.url, "sqlite://maintenance.db");
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/maintenance.toml"));
    assert!(result.is_err());
}

#[test]
fn test_toml_roundtrip_preserves_config() {
    let config = AppConfig::default();
    let serialized = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&serialized).unwrap();
    assert_eq!(parsed, config);
}
