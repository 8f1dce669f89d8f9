//! Multi-part upload and provider failure tests.

mod common;

use common::mock_sinks::*;
use dm_core::egress::s3::{InMemoryObjectStorage, MultiPartUploadStream, S3StorageEgressProvider};
use dm_core::egress::{
    EgressArtifactSettings, EgressError, EgressOperation, EgressPayload, EgressProvider,
    EgressProviderRegistry, EgressSource,
};
use dm_protocol::config_models::S3StorageEgressProviderOptions;
use dm_protocol::operation_models::OperationState;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "artifacts";
const MINIMUM_PART_SIZE: usize = 1024 * 8;

fn s3_options() -> S3StorageEgressProviderOptions {
    S3StorageEgressProviderOptions {
        bucket_name: BUCKET.to_string(),
        endpoint: None,
        region: None,
        upload_buffer_size: None,
        generate_presigned_url: false,
        presigned_url_expiry_secs: None,
    }
}

async fn upload(
    storage: &Arc<InMemoryObjectStorage>,
    key: &str,
    data: &[u8],
    chunk: usize,
    buffer_size: usize,
) -> Result<(), EgressError> {
    let mut stream = MultiPartUploadStream::create(
        storage.clone(),
        BUCKET,
        key,
        "application/octet-stream",
        &[],
        buffer_size,
    )
    .await?;
    for piece in data.chunks(chunk.max(1)) {
        stream.write(piece).await?;
    }
    stream.complete().await
}

#[tokio::test]
async fn test_parts_follow_minimum_size() {
    let storage = Arc::new(InMemoryObjectStorage::new().with_minimum_part_size(MINIMUM_PART_SIZE));
    let data = expected_bytes(MINIMUM_PART_SIZE * 3 + 1024);

    upload(&storage, "dump.dmp", &data, 1024, 0).await.unwrap();

    let sizes: Vec<usize> = storage
        .completed_parts(BUCKET, "dump.dmp")
        .iter()
        .map(|part| part.size)
        .collect();
    assert_eq!(
        sizes,
        vec![MINIMUM_PART_SIZE, MINIMUM_PART_SIZE, MINIMUM_PART_SIZE, 1024]
    );
    let numbers: Vec<u32> = storage
        .completed_parts(BUCKET, "dump.dmp")
        .iter()
        .map(|part| part.part_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(storage.object(BUCKET, "dump.dmp").unwrap().content, data);
}

#[tokio::test]
async fn test_failing_producer_aborts_upload() {
    let storage = Arc::new(InMemoryObjectStorage::new().with_minimum_part_size(MINIMUM_PART_SIZE));
    let provider = S3StorageEgressProvider::new(s3_options(), storage.clone());

    let result = provider
        .egress(
            EgressSource::Writer(Arc::new(FailingWriter {
                written: MINIMUM_PART_SIZE * 2 + 10,
            })),
            &EgressArtifactSettings::new("trace.nettrace", "application/octet-stream"),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(
        result,
        Err(EgressError::Artifact("producer failed".to_string()))
    );
    assert!(storage.object(BUCKET, "trace.nettrace").is_none());
    assert!(storage.completed_parts(BUCKET, "trace.nettrace").is_empty());
    assert_eq!(storage.pending_upload_count(), 0);
    assert_eq!(storage.aborted_upload_count(), 1);
}

#[tokio::test]
async fn test_failed_operation_leaves_no_object() {
    let storage = Arc::new(InMemoryObjectStorage::new().with_minimum_part_size(MINIMUM_PART_SIZE));
    let registry = Arc::new(EgressProviderRegistry::new());
    registry.register(
        "bucket",
        Arc::new(S3StorageEgressProvider::new(s3_options(), storage.clone())),
    );
    let store = common::fixtures::create_test_store(registry);

    let operation = EgressOperation::new(
        EgressPayload::Writer {
            writer: Arc::new(FailingWriter {
                written: MINIMUM_PART_SIZE + 1,
            }),
            file_name: "gc.gcdump".to_string(),
            content_type: "application/octet-stream".to_string(),
            artifact_type: "gcdump".to_string(),
        },
        "bucket",
        common::fixtures::create_test_process(7),
    );
    let id = store.add_operation(operation, "gcdump").unwrap();

    let mut status = store.get_operation_status(id).unwrap();
    for _ in 0..200 {
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        status = store.get_operation_status(id).unwrap();
    }

    assert_eq!(status.status, OperationState::Failed);
    assert!(status.error.unwrap().message.contains("producer failed"));
    assert!(storage.object(BUCKET, "gc.gcdump").is_none());
    assert_eq!(storage.aborted_upload_count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_parts_reconstruct_the_artifact(
        data in proptest::collection::vec(any::<u8>(), 0..40_000),
        chunk in 1usize..5_000,
        buffer_size in 0usize..20_000,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let storage = Arc::new(InMemoryObjectStorage::new().with_minimum_part_size(MINIMUM_PART_SIZE));
        runtime.block_on(upload(&storage, "artifact", &data, chunk, buffer_size)).unwrap();

        let stored = storage.object(BUCKET, "artifact").unwrap();
        prop_assert_eq!(&stored.content, &data);

        let parts = storage.completed_parts(BUCKET, "artifact");
        let total: usize = parts.iter().map(|part| part.size).sum();
        prop_assert_eq!(total, data.len());
        if let Some((_, all_but_last)) = parts.split_last() {
            for part in all_but_last {
                prop_assert!(part.size >= MINIMUM_PART_SIZE);
            }
        }
        for (index, part) in parts.iter().enumerate() {
            prop_assert_eq!(part.part_number as usize, index + 1);
        }
    }
}
