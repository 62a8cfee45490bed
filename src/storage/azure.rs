//! Azure Blob Storage
//!
//! The bucket is a container. A resolved access key id names the storage
//! account and the secret is its account key; without a key the builder uses
//! the ambient chain (`AZURE_*` variables, workload or managed identity).

use super::store::{client_options, parse_endpoint};
use super::StorageError;
use crate::config::BackupRequest;
use crate::credentials::StorageBackendConfig;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::ObjectStore;
use std::sync::Arc;

pub(crate) fn build_store(
    request: &BackupRequest,
    config: &StorageBackendConfig,
) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let mut builder = MicrosoftAzureBuilder::from_env()
        .with_container_name(&request.storage_location.bucket)
        .with_allow_http(request.insecure)
        .with_client_options(client_options(request)?);

    if let Some(account) = &config.access_key_id {
        builder = builder.with_account(account);
    }

    if let Some(key) = &config.secret_access_key {
        builder = builder.with_access_key(key);
    }

    if let Some(endpoint) = &config.endpoint {
        let endpoint = parse_endpoint(endpoint, request.insecure)?;
        builder = builder.with_endpoint(endpoint.as_str().trim_end_matches('/').to_string());
    }

    let store = builder.build().map_err(|e| {
        StorageError::Config(format!(
            "Azure needs a storage account name as access key id or in AZURE_STORAGE_ACCOUNT_NAME: {}",
            e
        ))
    })?;

    Ok(Arc::new(store))
}
