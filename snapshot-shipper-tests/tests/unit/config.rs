//! Unit tests for configuration loading and target selection

use snapshot_shipper::config::{load_config, select_targets, ConfigError, Provider};
use test_utils::{ConfigBuilder, ResultAssertions, TestContext};

#[test]
fn test_config_loading_valid() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().add_node("node-2", "dc2"));
    let config_path = ctx.write_config();

    let loaded = load_config(&config_path).assert_ok();

    assert_eq!(loaded.nodes.len(), 2);
    assert_eq!(loaded.request.snapshot_tag, "snap-1");
    assert_eq!(loaded.request.storage_location.provider, Provider::File);
}

#[test]
fn test_config_without_nodes_is_rejected() {
    let ctx = TestContext::from_builder(ConfigBuilder::new());
    let config_path = ctx.write_config();

    load_config(&config_path).assert_err_contains("No nodes defined");
}

#[test]
fn test_duplicate_node_is_rejected() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().add_node("node-1", "dc2"));
    let config_path = ctx.write_config();

    load_config(&config_path).assert_err_contains("more than once");
}

#[test]
fn test_unknown_local_node_is_rejected() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().local_only("node-9"));
    let config_path = ctx.write_config();

    assert!(matches!(load_config(&config_path), Err(ConfigError::NodeNotFound(_))));
}

#[test]
fn test_zero_concurrency_is_rejected() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_concurrency(0));
    let config_path = ctx.write_config();

    load_config(&config_path).assert_err_contains("Concurrent connections");
}

#[test]
fn test_global_request_targets_all_nodes() {
    let config = ConfigBuilder::minimal()
        .add_node("node-2", "dc1")
        .add_node("node-3", "dc2")
        .build();

    let targets = select_targets(&config, &[]).assert_ok();
    assert_eq!(targets.len(), 3);
}

#[test]
fn test_dc_filter_limits_targets() {
    let config = ConfigBuilder::minimal()
        .add_node("node-2", "dc1")
        .add_node("node-3", "dc2")
        .with_dc("dc2")
        .build();

    let targets = select_targets(&config, &[]).assert_ok();
    let ids: Vec<_> = targets.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["node-3"]);
}

#[test]
fn test_local_request_targets_local_node_only() {
    let config = ConfigBuilder::minimal()
        .add_node("node-2", "dc1")
        .local_only("node-2")
        .build();

    let targets = select_targets(&config, &[]).assert_ok();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].id, "node-2");
}

#[test]
fn test_node_filter_must_match_a_target() {
    let config = ConfigBuilder::minimal()
        .add_node("node-2", "dc2")
        .with_dc("dc1")
        .build();

    let result = select_targets(&config, &["node-2".to_string()]);
    assert!(matches!(result, Err(ConfigError::NodeNotFound(id)) if id == "node-2"));
}

#[test]
fn test_invalid_location_in_file() {
    let ctx = TestContext::new();
    let config_path = ctx.create_file(
        "config.toml",
        r#"
[request]
storage_location = "s3://only-a-bucket"
snapshot_tag = "snap-1"

[[nodes]]
id = "node-1"
datacenter = "dc1"
data_dir = "/var/lib/cassandra/data"
"#,
    );

    load_config(&config_path).assert_err_contains("Invalid storage location");
}

#[test]
fn test_empty_config() {
    let ctx = TestContext::new();
    let config_path = ctx.create_file("config.toml", "");

    assert!(load_config(&config_path).is_err(), "Empty config should fail");
}
