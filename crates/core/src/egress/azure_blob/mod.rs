//! Azure block blob egress provider.
//!
//! The artifact is cut into blocks that are staged in order and then
//! committed as one block list. Staged blocks are invisible until the commit,
//! so a failed egress needs no explicit cleanup.

pub mod client;

pub use client::{BlockBlobClient, InMemoryBlobStorage, StoredBlob};

use super::provider::{pump_into, ChunkSink, EgressArtifactSettings, EgressProvider, EgressSource};
use super::EgressError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use dm_protocol::config_models::AzureBlobEgressProviderOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Block ids within one blob must all have the same encoded length.
fn block_id(index: usize) -> String {
    STANDARD.encode(format!("{index:010}"))
}

struct BlockUpload<'a> {
    client: &'a dyn BlockBlobClient,
    container: &'a str,
    blob: &'a str,
    buffer: BytesMut,
    block_size: usize,
    block_ids: Vec<String>,
}

impl BlockUpload<'_> {
    async fn stage_buffer(&mut self) -> Result<(), EgressError> {
        let id = block_id(self.block_ids.len());
        let data = self.buffer.split().freeze();
        self.client
            .stage_block(self.container, self.blob, &id, data)
            .await?;
        self.block_ids.push(id);
        Ok(())
    }
}

#[async_trait]
impl<'a> ChunkSink for BlockUpload<'a> {
    async fn write_chunk(&mut self, mut data: &[u8]) -> Result<(), EgressError> {
        while !data.is_empty() {
            let take = (self.block_size - self.buffer.len()).min(data.len());
            self.buffer.put_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.block_size {
                self.stage_buffer().await?;
            }
        }
        Ok(())
    }
}

pub struct AzureBlobEgressProvider {
    options: AzureBlobEgressProviderOptions,
    client: Arc<dyn BlockBlobClient>,
}

impl AzureBlobEgressProvider {
    pub fn new(options: AzureBlobEgressProviderOptions, client: Arc<dyn BlockBlobClient>) -> Self {
        Self { options, client }
    }

    fn blob_name(&self, name: &str) -> String {
        match self.options.blob_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
            _ => name.to_string(),
        }
    }
}

#[async_trait]
impl EgressProvider for AzureBlobEgressProvider {
    fn kind(&self) -> &'static str {
        "azure_blob_storage"
    }

    async fn egress(
        &self,
        source: EgressSource,
        settings: &EgressArtifactSettings,
        token: CancellationToken,
    ) -> Result<String, EgressError> {
        let blob = self.blob_name(&settings.name);
        let block_size = self
            .options
            .upload_buffer_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_BLOCK_SIZE);

        let mut upload = BlockUpload {
            client: self.client.as_ref(),
            container: &self.options.container_name,
            blob: &blob,
            buffer: BytesMut::with_capacity(block_size),
            block_size,
            block_ids: Vec::new(),
        };

        pump_into(source, &mut upload, token).await?;
        if !upload.buffer.is_empty() {
            upload.stage_buffer().await?;
        }

        let mut metadata = settings.metadata.clone();
        for (key, value) in &self.options.metadata {
            if !metadata.iter().any(|(existing, _)| existing == key) {
                metadata.push((key.clone(), value.clone()));
            }
        }

        self.client
            .commit_block_list(
                &self.options.container_name,
                &blob,
                &upload.block_ids,
                &settings.content_type,
                &metadata,
            )
            .await?;
        tracing::debug!(blob = %blob, blocks = upload.block_ids.len(), "block blob committed");

        Ok(self.client.blob_url(&self.options.container_name, &blob))
    }
}
