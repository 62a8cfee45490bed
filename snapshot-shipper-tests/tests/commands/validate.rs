//! Tests for the 'validate' command
//!
//! The validate command loads the configuration and selects the backup targets.

use snapshot_shipper::config::{load_config, select_targets};
use test_utils::{ConfigBuilder, ResultAssertions, TestContext};

#[test]
fn test_validate_valid_config() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal()
            .add_node("node-2", "dc1")
            .with_entities(&["ks1"]),
    );
    let config_path = ctx.write_config();

    let loaded = load_config(&config_path).assert_ok();
    let targets = select_targets(&loaded, &[]).assert_ok();

    assert_eq!(targets.len(), 2);
    assert_eq!(loaded.request.entities.0.len(), 1);
}

#[test]
fn test_validate_cloud_locations() {
    for location in ["s3://bucket/cluster", "azure://container/cluster", "gcp://bucket/cluster"] {
        let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_location(location));
        let config_path = ctx.write_config();

        let loaded = load_config(&config_path).assert_ok();
        assert_eq!(loaded.request.storage_location.as_str(), location);
    }
}

#[test]
fn test_validate_invalid_toml() {
    let ctx = TestContext::new();
    let config_path = ctx.create_file("config.toml", "invalid { toml content");

    assert!(load_config(&config_path).is_err(), "Invalid TOML should fail");
}

#[test]
fn test_validate_missing_snapshot_tag() {
    let ctx = TestContext::new();
    let config_path = ctx.create_file(
        "config.toml",
        r#"
[request]
storage_location = "s3://bucket/cluster"

[[nodes]]
id = "node-1"
datacenter = "dc1"
data_dir = "/var/lib/cassandra/data"
"#,
    );

    assert!(load_config(&config_path).is_err());
}

#[test]
fn test_validate_tag_with_slash() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_tag("a/b"));
    let config_path = ctx.write_config();

    load_config(&config_path).assert_err_contains("must not contain '/'");
}

#[test]
fn test_validate_nonexistent_file() {
    let result = load_config(std::path::Path::new("/nonexistent/config.toml"));
    assert!(result.is_err(), "Nonexistent file should fail");
}
