//! Object storage client seam used by the S3 egress provider.

use crate::egress::EgressError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Smallest part an S3-compatible sink accepts, except for the last part.
pub const DEFAULT_MINIMUM_PART_SIZE: usize = 5 * 1024 * 1024;

/// One uploaded part of a multi-part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based, strictly increasing.
    pub part_number: u32,
    pub etag: String,
    pub size: usize,
}

/// The calls the S3 provider makes against an S3-compatible service.
///
/// Hosts supply a network client; [`InMemoryObjectStorage`] is provided for
/// tests and simulated runs.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    /// Start a multi-part upload and return its upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<String, EgressError>;

    /// Upload one part and return its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, EgressError>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), EgressError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), EgressError>;

    /// Single-request upload, used for empty artifacts.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: &[(String, String)],
        data: Bytes,
    ) -> Result<(), EgressError>;

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, EgressError>;

    fn minimum_part_size(&self) -> usize {
        DEFAULT_MINIMUM_PART_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub content_type: String,
    pub metadata: Vec<(String, String)>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    content_type: String,
    metadata: Vec<(String, String)>,
    parts: HashMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct StorageState {
    objects: HashMap<(String, String), StoredObject>,
    completed_parts: HashMap<(String, String), Vec<CompletedPart>>,
    pending: HashMap<String, PendingUpload>,
    aborted: usize,
    uploaded_parts: usize,
}

/// In-memory S3-compatible store.
///
/// Enforces the minimum part size on completion, so an upload that breaks
/// the part-size rule fails the same way it would against a real service.
pub struct InMemoryObjectStorage {
    state: Mutex<StorageState>,
    minimum_part_size: usize,
    fail_on_part: Option<u32>,
    presign_unavailable: bool,
}

impl Default for InMemoryObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StorageState::default()),
            minimum_part_size: DEFAULT_MINIMUM_PART_SIZE,
            fail_on_part: None,
            presign_unavailable: false,
        }
    }

    pub fn with_minimum_part_size(mut self, size: usize) -> Self {
        self.minimum_part_size = size;
        self
    }

    /// Make the upload of the given part number fail.
    pub fn with_failing_part(mut self, part_number: u32) -> Self {
        self.fail_on_part = Some(part_number);
        self
    }

    /// Make every pre-signing request fail.
    pub fn without_presigning(mut self) -> Self {
        self.presign_unavailable = true;
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Parts of the completed multi-part upload stored under `key`.
    pub fn completed_parts(&self, bucket: &str, key: &str) -> Vec<CompletedPart> {
        self.state
            .lock()
            .completed_parts
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn aborted_upload_count(&self) -> usize {
        self.state.lock().aborted
    }

    pub fn uploaded_part_count(&self) -> usize {
        self.state.lock().uploaded_parts
    }
}

#[async_trait]
impl ObjectStorageClient for InMemoryObjectStorage {
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<String, EgressError> {
        let upload_id = Uuid::new_v4().to_string();
        self.state.lock().pending.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.to_string(),
                metadata: metadata.to_vec(),
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, EgressError> {
        if self.fail_on_part == Some(part_number) {
            return Err(EgressError::provider(
                "s3_storage",
                format!("upload of part {part_number} was rejected"),
            ));
        }

        let mut state = self.state.lock();
        let upload = state.pending.get_mut(upload_id).ok_or_else(|| {
            EgressError::provider("s3_storage", format!("no such upload: {upload_id}"))
        })?;
        let etag = format!("\"{}\"", Uuid::new_v4().simple());
        upload.parts.insert(part_number, (etag.clone(), data));
        state.uploaded_parts += 1;
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), EgressError> {
        let mut state = self.state.lock();
        let upload = state.pending.remove(upload_id).ok_or_else(|| {
            EgressError::provider("s3_storage", format!("no such upload: {upload_id}"))
        })?;

        let mut content = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            let expected_number = index as u32 + 1;
            if part.part_number != expected_number {
                return Err(EgressError::provider(
                    "s3_storage",
                    format!("part {} is out of order", part.part_number),
                ));
            }
            let (etag, data) = upload.parts.get(&part.part_number).ok_or_else(|| {
                EgressError::provider("s3_storage", format!("part {} missing", part.part_number))
            })?;
            if *etag != part.etag {
                return Err(EgressError::provider(
                    "s3_storage",
                    format!("ETag mismatch for part {}", part.part_number),
                ));
            }
            let is_last = index + 1 == parts.len();
            if !is_last && data.len() < self.minimum_part_size {
                return Err(EgressError::provider(
                    "s3_storage",
                    format!("part {} is smaller than the minimum", part.part_number),
                ));
            }
            content.extend_from_slice(data);
        }

        let location = (upload.bucket.clone(), upload.key.clone());
        state.objects.insert(
            location.clone(),
            StoredObject {
                content,
                content_type: upload.content_type,
                metadata: upload.metadata,
            },
        );
        state.completed_parts.insert(location, parts.to_vec());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), EgressError> {
        let mut state = self.state.lock();
        if state.pending.remove(upload_id).is_some() {
            state.aborted += 1;
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: &[(String, String)],
        data: Bytes,
    ) -> Result<(), EgressError> {
        self.state.lock().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content: data.to_vec(),
                content_type: content_type.to_string(),
                metadata: metadata.to_vec(),
            },
        );
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, EgressError> {
        if self.presign_unavailable {
            return Err(EgressError::provider("s3_storage", "pre-signing is not available"));
        }
        Ok(format!(
            "memory://{bucket}/{key}?expires={}",
            expires_in.as_secs()
        ))
    }

    fn minimum_part_size(&self) -> usize {
        self.minimum_part_size
    }
}
