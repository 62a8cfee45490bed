//! Backend construction per provider

use super::object::ObjectBackuper;
use super::store::ObjectStoreClient;
use super::{azure, gcs, s3};
use super::{LocalBackuper, LoggingObserver, NodeIdentity, StorageBackend, StorageError, TransferObserver};
use crate::config::{BackupRequest, Config, Provider};
use crate::credentials::CredentialResolver;
use std::sync::Arc;

/// Builds one backend per node of an operation
pub trait BackendFactory: Send + Sync {
    fn build(
        &self,
        request: &BackupRequest,
        node: &NodeIdentity,
    ) -> Result<Arc<dyn StorageBackend>, StorageError>;
}

/// Factory resolving credentials and picking the backend by provider
pub struct DefaultBackendFactory {
    resolver: CredentialResolver,
    path_style_access: bool,
    observer: Arc<dyn TransferObserver>,
}

impl DefaultBackendFactory {
    pub fn new(resolver: CredentialResolver, path_style_access: bool) -> Self {
        Self {
            resolver,
            path_style_access,
            observer: Arc::new(LoggingObserver),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            CredentialResolver::from_process(&crate::config::expand_tilde(&config.storage.secrets_root)),
            config.storage.path_style_access,
        )
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Each call builds its own store, so backends never share a client
    fn object_backend(
        &self,
        request: &BackupRequest,
        node: &NodeIdentity,
    ) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let provider = request.storage_location.provider;
        let config = self.resolver.resolve(request)?;

        let store = match provider {
            Provider::S3 => s3::build_store(request, &config, self.path_style_access)?,
            Provider::Azure => azure::build_store(request, &config)?,
            Provider::Gcp => gcs::build_store(request, &config)?,
            Provider::File => {
                return Err(StorageError::Config(
                    "file locations have no object store".to_string(),
                ))
            }
        };
        let client = ObjectStoreClient::new(provider, &request.storage_location.bucket, store);

        Ok(Arc::new(ObjectBackuper::new(
            provider,
            node.clone(),
            request,
            Box::new(client),
            Arc::clone(&self.observer),
        )))
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn build(
        &self,
        request: &BackupRequest,
        node: &NodeIdentity,
    ) -> Result<Arc<dyn StorageBackend>, StorageError> {
        match request.storage_location.provider {
            Provider::S3 | Provider::Azure | Provider::Gcp => self.object_backend(request, node),
            Provider::File => Ok(Arc::new(LocalBackuper::new(
                node.clone(),
                request,
                Arc::clone(&self.observer),
            )?)),
        }
    }
}
