//! Block blob client seam used by the Azure blob egress provider.

use crate::egress::EgressError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The calls the Azure blob provider makes against a blob container.
#[async_trait]
pub trait BlockBlobClient: Send + Sync {
    /// Stage an uncommitted block. Staged blocks are never visible on their own.
    async fn stage_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), EgressError>;

    /// Commit the listed blocks, in order, as the blob's content.
    async fn commit_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<(), EgressError>;

    fn blob_url(&self, container: &str, blob: &str) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub content: Vec<u8>,
    pub content_type: String,
    pub metadata: Vec<(String, String)>,
    pub block_ids: Vec<String>,
}

#[derive(Default)]
struct BlobState {
    staged: HashMap<(String, String), HashMap<String, Bytes>>,
    committed: HashMap<(String, String), StoredBlob>,
}

/// In-memory blob container.
pub struct InMemoryBlobStorage {
    account_uri: String,
    state: Mutex<BlobState>,
    fail_on_commit: bool,
}

impl InMemoryBlobStorage {
    pub fn new(account_uri: impl Into<String>) -> Self {
        Self {
            account_uri: account_uri.into(),
            state: Mutex::new(BlobState::default()),
            fail_on_commit: false,
        }
    }

    pub fn with_commit_failure(mut self) -> Self {
        self.fail_on_commit = true;
        self
    }

    pub fn blob(&self, container: &str, blob: &str) -> Option<StoredBlob> {
        self.state
            .lock()
            .committed
            .get(&(container.to_string(), blob.to_string()))
            .cloned()
    }

    pub fn staged_block_count(&self, container: &str, blob: &str) -> usize {
        self.state
            .lock()
            .staged
            .get(&(container.to_string(), blob.to_string()))
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl BlockBlobClient for InMemoryBlobStorage {
    async fn stage_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), EgressError> {
        self.state
            .lock()
            .staged
            .entry((container.to_string(), blob.to_string()))
            .or_default()
            .insert(block_id.to_string(), data);
        Ok(())
    }

    async fn commit_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<(), EgressError> {
        if self.fail_on_commit {
            return Err(EgressError::provider(
                "azure_blob_storage",
                "commit rejected by the service",
            ));
        }

        let mut state = self.state.lock();
        let location = (container.to_string(), blob.to_string());
        let staged = state.staged.remove(&location).unwrap_or_default();

        let mut content = Vec::new();
        for block_id in block_ids {
            let data = staged.get(block_id).ok_or_else(|| {
                EgressError::provider(
                    "azure_blob_storage",
                    format!("block {block_id} was never staged"),
                )
            })?;
            content.extend_from_slice(data);
        }

        state.committed.insert(
            location,
            StoredBlob {
                content,
                content_type: content_type.to_string(),
                metadata: metadata.to_vec(),
                block_ids: block_ids.to_vec(),
            },
        );
        Ok(())
    }

    fn blob_url(&self, container: &str, blob: &str) -> String {
        format!(
            "{}/{}/{}",
            self.account_uri.trim_end_matches('/'),
            container,
            blob
        )
    }
}
