//! Named egress provider registry.
//!
//! Providers are resolved by name when an egress operation executes, not
//! when it is created, so the registry can be repopulated from a reloaded
//! configuration while rules keep running.

use super::azure_blob::{AzureBlobEgressProvider, BlockBlobClient, InMemoryBlobStorage};
use super::extension::ExtensionEgressProvider;
use super::filesystem::FileSystemEgressProvider;
use super::provider::EgressProvider;
use super::s3::{InMemoryObjectStorage, ObjectStorageClient, S3StorageEgressProvider};
use super::EgressError;
use dm_protocol::config_models::{
    AzureBlobEgressProviderOptions, EgressConfig, S3StorageEgressProviderOptions,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Supplies network clients for the cloud providers.
///
/// Hosts that talk to real services implement this; the in-memory version
/// backs tests and simulated runs.
pub trait SinkClientFactory: Send + Sync {
    fn object_storage(&self, options: &S3StorageEgressProviderOptions)
        -> Arc<dyn ObjectStorageClient>;

    fn block_blob(&self, options: &AzureBlobEgressProviderOptions) -> Arc<dyn BlockBlobClient>;
}

/// Hands out one shared in-memory store per bucket and per account.
#[derive(Default)]
pub struct InMemorySinkClients {
    buckets: parking_lot::Mutex<HashMap<String, Arc<InMemoryObjectStorage>>>,
    accounts: parking_lot::Mutex<HashMap<String, Arc<InMemoryBlobStorage>>>,
}

impl InMemorySinkClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self, bucket_name: &str) -> Arc<InMemoryObjectStorage> {
        Arc::clone(
            self.buckets
                .lock()
                .entry(bucket_name.to_string())
                .or_insert_with(|| Arc::new(InMemoryObjectStorage::new())),
        )
    }

    pub fn account(&self, account_uri: &str) -> Arc<InMemoryBlobStorage> {
        Arc::clone(
            self.accounts
                .lock()
                .entry(account_uri.to_string())
                .or_insert_with(|| Arc::new(InMemoryBlobStorage::new(account_uri))),
        )
    }
}

impl SinkClientFactory for InMemorySinkClients {
    fn object_storage(
        &self,
        options: &S3StorageEgressProviderOptions,
    ) -> Arc<dyn ObjectStorageClient> {
        self.bucket(&options.bucket_name)
    }

    fn block_blob(&self, options: &AzureBlobEgressProviderOptions) -> Arc<dyn BlockBlobClient> {
        self.account(&options.account_uri)
    }
}

#[derive(Default)]
pub struct EgressProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn EgressProvider>>>,
}

impl EgressProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding every provider in `config`.
    pub fn from_config(config: &EgressConfig, clients: &dyn SinkClientFactory) -> Self {
        let registry = Self::new();
        registry.replace(build_providers(config, clients));
        registry
    }

    /// Register a provider, replacing any provider with the same name.
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn EgressProvider>) {
        self.providers.write().insert(name.into(), provider);
    }

    /// Look up a provider by name.
    ///
    /// # Errors
    ///
    /// Returns `EgressError::ProviderNotFound` if no provider has that name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn EgressProvider>, EgressError> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EgressError::ProviderNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.read().contains_key(name)
    }

    /// Registered names with their provider kind, sorted by name.
    pub fn names(&self) -> Vec<(String, &'static str)> {
        let mut names: Vec<_> = self
            .providers
            .read()
            .iter()
            .map(|(name, provider)| (name.clone(), provider.kind()))
            .collect();
        names.sort();
        names
    }

    /// Swap the whole provider set at once.
    pub fn replace(&self, providers: HashMap<String, Arc<dyn EgressProvider>>) {
        *self.providers.write() = providers;
    }

    /// Rebuild the provider set from a reloaded configuration.
    pub fn reload(&self, config: &EgressConfig, clients: &dyn SinkClientFactory) {
        self.replace(build_providers(config, clients));
    }
}

fn build_providers(
    config: &EgressConfig,
    clients: &dyn SinkClientFactory,
) -> HashMap<String, Arc<dyn EgressProvider>> {
    let mut providers: HashMap<String, Arc<dyn EgressProvider>> = HashMap::new();

    for (name, options) in &config.filesystem {
        providers.insert(
            name.clone(),
            Arc::new(FileSystemEgressProvider::new(options.clone())),
        );
    }
    for (name, options) in &config.s3_storage {
        providers.insert(
            name.clone(),
            Arc::new(S3StorageEgressProvider::new(
                options.clone(),
                clients.object_storage(options),
            )),
        );
    }
    for (name, options) in &config.azure_blob_storage {
        providers.insert(
            name.clone(),
            Arc::new(AzureBlobEgressProvider::new(
                options.clone(),
                clients.block_blob(options),
            )),
        );
    }
    for (name, options) in &config.extension {
        providers.insert(
            name.clone(),
            Arc::new(ExtensionEgressProvider::new(name.clone(), options.clone())),
        );
    }

    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_protocol::config_models::FileSystemEgressProviderOptions;

    fn config() -> EgressConfig {
        let mut config = EgressConfig::default();
        config.filesystem.insert(
            "local".to_string(),
            FileSystemEgressProviderOptions {
                directory_path: "/tmp/diagmon".into(),
                intermediate_directory_path: None,
                copy_buffer_size: None,
            },
        );
        config.s3_storage.insert(
            "bucket".to_string(),
            S3StorageEgressProviderOptions {
                bucket_name: "artifacts".to_string(),
                endpoint: None,
                region: None,
                upload_buffer_size: None,
                generate_presigned_url: false,
                presigned_url_expiry_secs: None,
            },
        );
        config
    }

    #[test]
    fn test_from_config_registers_every_provider() {
        let registry = EgressProviderRegistry::from_config(&config(), &InMemorySinkClients::new());
        assert_eq!(
            registry.names(),
            vec![
                ("bucket".to_string(), "s3_storage"),
                ("local".to_string(), "filesystem"),
            ]
        );
    }

    #[test]
    fn test_unknown_provider() {
        let registry = EgressProviderRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(EgressError::ProviderNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_reload_replaces_providers() {
        let clients = InMemorySinkClients::new();
        let registry = EgressProviderRegistry::from_config(&config(), &clients);
        registry.reload(&EgressConfig::default(), &clients);
        assert!(!registry.contains("local"));
        assert!(registry.names().is_empty());
    }
}
