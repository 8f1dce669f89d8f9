//! Streaming multi-part upload.
//!
//! Bytes written to a [`MultiPartUploadStream`] accumulate in a buffer whose
//! capacity is at least the sink's minimum part size. Each time the buffer
//! fills it is uploaded as the next part. `complete` uploads whatever is left
//! as the final (possibly short) part and commits the upload; any failure, or
//! dropping the stream before completion, aborts the upload at the sink so no
//! partial object becomes visible.

use super::client::{CompletedPart, ObjectStorageClient};
use crate::egress::provider::ChunkSink;
use crate::egress::EgressError;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;

pub struct MultiPartUploadStream {
    client: Arc<dyn ObjectStorageClient>,
    bucket: String,
    key: String,
    content_type: String,
    metadata: Vec<(String, String)>,
    upload_id: Option<String>,
    buffer: BytesMut,
    buffer_capacity: usize,
    parts: Vec<CompletedPart>,
    bytes_written: u64,
}

impl MultiPartUploadStream {
    /// Start a multi-part upload for `key`.
    ///
    /// The buffer capacity is `buffer_size`, raised to the client's minimum
    /// part size when smaller.
    pub async fn create(
        client: Arc<dyn ObjectStorageClient>,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: &[(String, String)],
        buffer_size: usize,
    ) -> Result<Self, EgressError> {
        let buffer_capacity = buffer_size.max(client.minimum_part_size()).max(1);
        let upload_id = client
            .create_multipart_upload(bucket, key, content_type, metadata)
            .await?;
        tracing::debug!(bucket, key, upload_id = %upload_id, buffer_capacity, "multi-part upload created");

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            metadata: metadata.to_vec(),
            upload_id: Some(upload_id),
            buffer: BytesMut::with_capacity(buffer_capacity),
            buffer_capacity,
            parts: Vec::new(),
            bytes_written: 0,
        })
    }

    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append bytes, uploading a part each time the buffer fills.
    ///
    /// A failed part upload aborts the whole upload.
    pub async fn write(&mut self, mut data: &[u8]) -> Result<(), EgressError> {
        if self.upload_id.is_none() {
            return Err(EgressError::provider("s3_storage", "upload is already closed"));
        }

        while !data.is_empty() {
            let room = self.buffer_capacity - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.put_slice(&data[..take]);
            self.bytes_written += take as u64;
            data = &data[take..];

            if self.buffer.len() == self.buffer_capacity {
                if let Err(e) = self.upload_buffer().await {
                    self.abort().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Upload the remaining buffer as the final part and commit the upload.
    ///
    /// When nothing was written the multi-part upload is aborted and an empty
    /// object is stored with a single put instead.
    pub async fn complete(mut self) -> Result<(), EgressError> {
        let Some(upload_id) = self.upload_id.clone() else {
            return Err(EgressError::provider("s3_storage", "upload is already closed"));
        };

        if self.bytes_written == 0 {
            self.abort().await;
            return self
                .client
                .put_object(
                    &self.bucket,
                    &self.key,
                    &self.content_type,
                    &self.metadata,
                    bytes::Bytes::new(),
                )
                .await;
        }

        let finished = async {
            if !self.buffer.is_empty() {
                self.upload_buffer().await?;
            }
            self.client
                .complete_multipart_upload(&self.bucket, &self.key, &upload_id, &self.parts)
                .await
        }
        .await;

        match finished {
            Ok(()) => {
                tracing::debug!(key = %self.key, parts = self.parts.len(), bytes = self.bytes_written, "multi-part upload completed");
                self.upload_id = None;
                Ok(())
            }
            Err(e) => {
                self.abort().await;
                Err(e)
            }
        }
    }

    /// Abort the upload at the sink. Safe to call more than once.
    pub async fn abort(&mut self) {
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(e) = self
                .client
                .abort_multipart_upload(&self.bucket, &self.key, &upload_id)
                .await
            {
                tracing::warn!(key = %self.key, error = %e, "failed to abort multi-part upload");
            }
        }
    }

    async fn upload_buffer(&mut self) -> Result<(), EgressError> {
        let upload_id = self
            .upload_id
            .as_deref()
            .ok_or_else(|| EgressError::provider("s3_storage", "upload is already closed"))?;
        let part_number = self.parts.len() as u32 + 1;
        let data = self.buffer.split().freeze();
        let size = data.len();

        let etag = self
            .client
            .upload_part(&self.bucket, &self.key, upload_id, part_number, data)
            .await?;
        self.parts.push(CompletedPart {
            part_number,
            etag,
            size,
        });
        self.buffer.reserve(self.buffer_capacity);
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for MultiPartUploadStream {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), EgressError> {
        self.write(data).await
    }
}

impl Drop for MultiPartUploadStream {
    fn drop(&mut self) {
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %self.key, "multi-part upload dropped outside a runtime; not aborted");
            return;
        };

        let client = Arc::clone(&self.client);
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = client
                .abort_multipart_upload(&bucket, &key, &upload_id)
                .await
            {
                tracing::warn!(key = %key, error = %e, "failed to abort dropped multi-part upload");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::s3::client::InMemoryObjectStorage;

    const MINIMUM: usize = 1024;

    fn storage() -> Arc<InMemoryObjectStorage> {
        Arc::new(InMemoryObjectStorage::new().with_minimum_part_size(MINIMUM))
    }

    async fn create(storage: &Arc<InMemoryObjectStorage>, buffer: usize) -> MultiPartUploadStream {
        MultiPartUploadStream::create(
            Arc::clone(storage) as Arc<dyn ObjectStorageClient>,
            "bucket",
            "key",
            "application/octet-stream",
            &[],
            buffer,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_buffer_never_smaller_than_minimum() {
        let storage = storage();
        let mut upload = create(&storage, 10).await;

        upload.write(&[7u8; MINIMUM - 1]).await.unwrap();
        assert!(upload.parts().is_empty());

        upload.write(&[7u8; 2]).await.unwrap();
        assert_eq!(upload.parts().len(), 1);
        assert_eq!(upload.parts()[0].size, MINIMUM);

        upload.complete().await.unwrap();
        let parts = storage.completed_parts("bucket", "key");
        assert_eq!(parts.iter().map(|p| p.size).collect::<Vec<_>>(), vec![MINIMUM, 1]);
    }

    #[tokio::test]
    async fn test_empty_upload_uses_single_put() {
        let storage = storage();
        let upload = create(&storage, MINIMUM).await;
        upload.complete().await.unwrap();

        let object = storage.object("bucket", "key").unwrap();
        assert!(object.content.is_empty());
        assert_eq!(storage.aborted_upload_count(), 1);
        assert_eq!(storage.uploaded_part_count(), 0);
        assert!(storage.completed_parts("bucket", "key").is_empty());
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let storage = Arc::new(
            InMemoryObjectStorage::new()
                .with_minimum_part_size(MINIMUM)
                .with_failing_part(2),
        );
        let mut upload = create(&storage, MINIMUM).await;

        let result = upload.write(&vec![1u8; MINIMUM * 3]).await;
        assert!(result.is_err());
        assert_eq!(storage.pending_upload_count(), 0);
        assert_eq!(storage.aborted_upload_count(), 1);
        assert!(storage.object("bucket", "key").is_none());

        assert!(upload.write(b"more").await.is_err());
    }

    #[tokio::test]
    async fn test_drop_without_complete_aborts() {
        let storage = storage();
        {
            let mut upload = create(&storage, MINIMUM).await;
            upload.write(&[1u8; MINIMUM + 5]).await.unwrap();
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(storage.pending_upload_count(), 0);
        assert_eq!(storage.aborted_upload_count(), 1);
        assert!(storage.object("bucket", "key").is_none());
    }
}
