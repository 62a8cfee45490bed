//! Unit tests for tiered credential resolution against mounted secrets

use snapshot_shipper::credentials::{ConfigSource, CredentialError, CredentialResolver, MountedSecretReader};
use serial_test::serial;
use std::collections::HashMap;
use std::sync::Arc;
use test_utils::{kubernetes_env, write_secret, ConfigBuilder, ResultAssertions};

fn resolver(env: HashMap<String, String>, secrets_root: &std::path::Path) -> CredentialResolver {
    CredentialResolver::new(Arc::new(env), Arc::new(MountedSecretReader::new(secrets_root)))
}

#[test]
fn test_secret_tier_inside_kubernetes() {
    let builder = ConfigBuilder::minimal()
        .with_location("s3://bucket/cluster")
        .with_secret("backups", "object-store");
    let secrets_root = builder.temp_dir().join("secrets");
    write_secret(
        &secrets_root,
        "backups",
        "object-store",
        &HashMap::from([
            ("access-key-id", "AKIA"),
            ("secret-access-key", "s3cr3t\n"),
            ("region", "EU-West-1"),
        ]),
    );
    let config = builder.build();

    let resolved = resolver(kubernetes_env(), &secrets_root)
        .resolve(&config.request)
        .assert_ok();

    assert_eq!(resolved.access_key_id.as_deref(), Some("AKIA"));
    assert_eq!(resolved.secret_access_key.as_deref(), Some("s3cr3t"));
    assert_eq!(resolved.region.as_deref(), Some("eu-west-1"));
    assert_eq!(
        resolved.source,
        ConfigSource::Secret {
            namespace: "backups".to_string(),
            name: "object-store".to_string()
        }
    );
}

#[test]
fn test_missing_secret_keys_are_named() {
    let builder = ConfigBuilder::minimal()
        .with_location("azure://container/cluster")
        .with_secret("backups", "partial");
    let secrets_root = builder.temp_dir().join("secrets");
    write_secret(&secrets_root, "backups", "partial", &HashMap::from([("access-key-id", "account")]));
    let config = builder.build();

    let result = resolver(kubernetes_env(), &secrets_root).resolve(&config.request);

    match result {
        Err(CredentialError::MissingSecretEntries { keys, .. }) => {
            assert_eq!(keys, vec!["secret-access-key".to_string()]);
        }
        other => panic!("Expected missing entries, got {:?}", other),
    }
}

#[test]
fn test_environment_tier_outside_kubernetes() {
    let builder = ConfigBuilder::minimal()
        .with_location("gcp://bucket/cluster")
        .with_secret("backups", "ignored");
    let secrets_root = builder.temp_dir().join("secrets");
    let config = builder.build();

    let env = HashMap::from([("GCP_REGION".to_string(), "europe-west4".to_string())]);
    let resolved = resolver(env, &secrets_root).resolve(&config.request).assert_ok();

    assert_eq!(resolved.source, ConfigSource::Environment);
    assert_eq!(resolved.region.as_deref(), Some("europe-west4"));
    assert!(!resolved.has_static_keys());
}

#[test]
fn test_endpoint_without_region_is_rejected() {
    let builder = ConfigBuilder::minimal().with_location("s3://bucket/cluster");
    let secrets_root = builder.temp_dir().join("secrets");
    let config = builder.build();

    let env = HashMap::from([("AWS_ENDPOINT".to_string(), "http://minio:9000".to_string())]);
    resolver(env, &secrets_root)
        .resolve(&config.request)
        .assert_err_contains("AWS_REGION must be set if AWS_ENDPOINT is set");
}

#[test]
fn test_file_provider_needs_no_configuration() {
    let builder = ConfigBuilder::minimal();
    let secrets_root = builder.temp_dir().join("secrets");
    let config = builder.build();

    let resolved = resolver(kubernetes_env(), &secrets_root)
        .resolve(&config.request)
        .assert_ok();

    assert_eq!(resolved.source, ConfigSource::NotRequired);
}

// The tests below change the process environment

#[test]
#[serial]
fn test_process_environment_region() {
    let builder = ConfigBuilder::minimal().with_location("s3://bucket/cluster");
    let secrets_root = builder.temp_dir().join("secrets");
    let config = builder.build();

    std::env::set_var("AWS_REGION", "EU-CENTRAL-1");
    std::env::remove_var("AWS_ENDPOINT");
    let resolved = CredentialResolver::from_process(&secrets_root).resolve(&config.request);
    std::env::remove_var("AWS_REGION");

    let resolved = resolved.assert_ok();
    assert_eq!(resolved.region.as_deref(), Some("eu-central-1"));
    assert!(resolved.endpoint.is_none());
}

#[test]
#[serial]
fn test_process_environment_endpoint_needs_region() {
    let builder = ConfigBuilder::minimal().with_location("azure://container/cluster");
    let secrets_root = builder.temp_dir().join("secrets");
    let config = builder.build();

    std::env::set_var("AZURE_ENDPOINT", "http://azurite:10000");
    std::env::remove_var("AZURE_REGION");
    let result = CredentialResolver::from_process(&secrets_root).resolve(&config.request);
    std::env::remove_var("AZURE_ENDPOINT");

    result.assert_err_contains("AZURE_REGION must be set");
}
