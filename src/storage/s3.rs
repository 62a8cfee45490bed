//! Amazon S3 and S3-compatible stores

use super::store::{client_options, parse_endpoint};
use super::StorageError;
use crate::config::BackupRequest;
use crate::credentials::StorageBackendConfig;
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use std::sync::Arc;

/// Region used when none is resolved
const DEFAULT_REGION: &str = "us-east-1";

/// Endpoint for the store. Virtual-hosted requests carry the bucket in the
/// host, so a custom endpoint gets it prepended.
fn endpoint(
    config: &StorageBackendConfig,
    bucket: &str,
    region: &str,
    path_style: bool,
    insecure: bool,
) -> Result<Option<String>, StorageError> {
    let mut url = match &config.endpoint {
        Some(endpoint) => parse_endpoint(endpoint, insecure)?,
        // the builder derives https endpoints itself
        None if !insecure => return Ok(None),
        None => parse_endpoint(&format!("s3.{}.amazonaws.com", region), true)?,
    };

    if !path_style {
        let host = url
            .host_str()
            .ok_or_else(|| StorageError::Config(format!("Endpoint '{}' has no host", url)))?
            .to_string();
        url.set_host(Some(&format!("{}.{}", bucket, host)))
            .map_err(|e| StorageError::Config(format!("Invalid bucket host: {}", e)))?;
    }

    Ok(Some(url.as_str().trim_end_matches('/').to_string()))
}

/// Build the store for the request's bucket.
///
/// Static keys come from a resolved secret; without them the builder falls
/// back to the ambient chain (`AWS_*` variables, web identity, container and
/// instance credentials).
pub(crate) fn build_store(
    request: &BackupRequest,
    config: &StorageBackendConfig,
    path_style: bool,
) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let bucket = &request.storage_location.bucket;
    let region = config.region.as_deref().unwrap_or(DEFAULT_REGION);

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(region)
        .with_virtual_hosted_style_request(!path_style)
        .with_allow_http(request.insecure)
        .with_client_options(client_options(request)?);

    if let Some(endpoint) = endpoint(config, bucket, region, path_style, request.insecure)? {
        builder = builder.with_endpoint(endpoint);
    }

    if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        builder = builder
            .with_access_key_id(key_id)
            .with_secret_access_key(secret);
    }

    let store = builder
        .build()
        .map_err(|e| StorageError::Config(format!("Invalid S3 configuration: {}", e)))?;

    Ok(Arc::new(store))
}
