//! Google Cloud Storage
//!
//! A resolved secret holds the service account key (JSON). Without one the
//! builder uses application default credentials or the metadata server.

use super::store::client_options;
use super::StorageError;
use crate::config::BackupRequest;
use crate::credentials::StorageBackendConfig;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::warn;

pub(crate) fn build_store(
    request: &BackupRequest,
    config: &StorageBackendConfig,
) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let mut builder = GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(&request.storage_location.bucket)
        .with_client_options(client_options(request)?);

    if let Some(key) = &config.secret_access_key {
        builder = builder.with_service_account_key(key);
    }

    if let Some(endpoint) = &config.endpoint {
        warn!("Ignoring endpoint '{}': GCS requests always go to Google", endpoint);
    }

    let store = builder
        .build()
        .map_err(|e| StorageError::Config(format!("Invalid GCS configuration: {}", e)))?;

    Ok(Arc::new(store))
}
