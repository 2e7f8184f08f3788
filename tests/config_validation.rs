//! Integration coverage for `FabricConfig`'s TOML round-trip and cross-field validation (§10).

use switchboard::domain_types::{HeartbeatIntervalSecs, TaskTimeoutSecs};
use switchboard::FabricConfig;

#[test]
fn development_production_and_testing_presets_all_validate() {
    assert!(FabricConfig::development().validate().is_ok());
    assert!(FabricConfig::production().validate().is_ok());
    assert!(FabricConfig::testing().validate().is_ok());
}

#[test]
fn save_and_load_round_trips_through_a_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fabric.toml");

    let config = FabricConfig::production();
    config.save_to_file(&path).unwrap();

    let restored = FabricConfig::load_from_file(&path).unwrap();
    assert_eq!(restored.max_rounds, config.max_rounds);
    assert_eq!(restored.redis_url, config.redis_url);
    assert_eq!(restored.sqlite_path, config.sqlite_path);
    assert_eq!(restored.min_cluster_samples, config.min_cluster_samples);
}

#[test]
fn json_logs_without_any_real_backend_fails_validation() {
    let mut config = FabricConfig::development();
    config.redis_url = None;
    config.sqlite_path = None;
    config.json_logs = true;
    assert!(config.validate().is_err());
}

#[test]
fn zero_min_cluster_samples_fails_validation() {
    let mut config = FabricConfig::development();
    config.min_cluster_samples = 0;
    assert!(config.validate().is_err());
}

#[test]
fn task_timeout_shorter_than_heartbeat_liveness_ttl_fails_validation() {
    let mut config = FabricConfig::development();
    config.heartbeat_interval_secs = HeartbeatIntervalSecs::try_new(10).unwrap();
    config.task_timeout_secs = TaskTimeoutSecs::try_new(5).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn loading_a_malformed_toml_file_returns_a_toml_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "this is not valid = = toml").unwrap();
    assert!(FabricConfig::load_from_file(&path).is_err());
}

#[test]
fn builder_produces_a_valid_config_by_default() {
    let config = FabricConfig::builder().json_logs(false).build().unwrap();
    assert!(!config.json_logs);
}
