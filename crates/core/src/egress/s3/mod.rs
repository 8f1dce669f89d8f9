//! S3-compatible egress provider.

pub mod client;
pub mod multipart;

pub use client::{
    CompletedPart, InMemoryObjectStorage, ObjectStorageClient, StoredObject,
    DEFAULT_MINIMUM_PART_SIZE,
};
pub use multipart::MultiPartUploadStream;

use super::provider::{pump_into, EgressArtifactSettings, EgressProvider, EgressSource};
use super::EgressError;
use async_trait::async_trait;
use dm_protocol::config_models::S3StorageEgressProviderOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct S3StorageEgressProvider {
    options: S3StorageEgressProviderOptions,
    client: Arc<dyn ObjectStorageClient>,
}

impl S3StorageEgressProvider {
    pub fn new(options: S3StorageEgressProviderOptions, client: Arc<dyn ObjectStorageClient>) -> Self {
        Self { options, client }
    }
}

#[async_trait]
impl EgressProvider for S3StorageEgressProvider {
    fn kind(&self) -> &'static str {
        "s3_storage"
    }

    async fn egress(
        &self,
        source: EgressSource,
        settings: &EgressArtifactSettings,
        token: CancellationToken,
    ) -> Result<String, EgressError> {
        let bucket = &self.options.bucket_name;
        let key = &settings.name;

        let mut upload = MultiPartUploadStream::create(
            Arc::clone(&self.client),
            bucket,
            key,
            &settings.content_type,
            &settings.metadata,
            self.options.upload_buffer_size.unwrap_or(0),
        )
        .await?;

        if let Err(e) = pump_into(source, &mut upload, token).await {
            upload.abort().await;
            return Err(e);
        }
        upload.complete().await?;

        let location = format!("BucketName={bucket}, Key={key}");
        if self.options.generate_presigned_url {
            let expiry = Duration::from_secs(self.options.presigned_url_expiry_secs());
            // The object is already committed; report where it is even when
            // no URL can be signed for it.
            return match self.client.presign_get(bucket, key, expiry).await {
                Ok(url) => Ok(url),
                Err(e) => {
                    tracing::warn!(bucket = %bucket, key = %key, error = %e, "cannot pre-sign artifact URL");
                    Ok(location)
                }
            };
        }
        Ok(location)
    }
}
