//! Egress operation store.
//!
//! The store admits egress operations under per-artifact-type concurrency
//! limits, runs each admitted operation on its own task, and keeps the status
//! of every operation for the lifetime of the process.
//!
//! Admission is strict: when the limit for an operation's limit key is
//! reached the call fails immediately with
//! [`OperationStoreError::TooManyRequests`]. Nothing is queued.

use super::limits::{RequestLimitGuard, RequestLimitTracker};
use super::operation::{EgressOperation, EgressResult, ExecutionResult};
use super::registry::EgressProviderRegistry;
use super::EgressError;
use chrono::Utc;
use dm_protocol::config_models::{default_operation_limit, GlobalConfig};
use dm_protocol::ipc::Event;
use dm_protocol::operation_models::{
    OperationError, OperationState, OperationStatus, OperationSummary,
};
use dm_protocol::process_models::ProcessKey;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationStoreError {
    /// The concurrency limit for this artifact type is already reached.
    #[error("Too many concurrent '{limit_key}' requests (limit {limit})")]
    TooManyRequests { limit_key: String, limit: u32 },

    #[error("Operation {0} not found")]
    NotFound(Uuid),

    #[error("Operation {id} is {state:?} and cannot be {action}")]
    InvalidState {
        id: Uuid,
        state: OperationState,
        action: &'static str,
    },

    #[error("Operation {0} does not support stopping")]
    NotStoppable(Uuid),

    /// The admitted operation ran and failed.
    #[error(transparent)]
    Execution(#[from] EgressError),
}

/// Type alias for Result with OperationStoreError.
pub type OperationStoreResult<T> = Result<T, OperationStoreError>;

struct OperationEntry {
    status: OperationStatus,
    operation: Arc<EgressOperation>,
    token: CancellationToken,
}

struct StoreInner {
    entries: Mutex<HashMap<Uuid, OperationEntry>>,
    limits: RequestLimitTracker,
    registry: Arc<EgressProviderRegistry>,
    shutdown: CancellationToken,
    events_tx: Option<mpsc::Sender<Event>>,
}

/// An operation admitted through [`EgressOperationStore::register_operation`].
pub struct PendingOperation {
    pub operation_id: Uuid,
    completion: oneshot::Receiver<ExecutionResult>,
}

impl PendingOperation {
    /// Wait for the operation to reach a terminal state.
    pub async fn wait(self) -> ExecutionResult {
        self.completion.await.unwrap_or(Err(EgressError::Cancelled))
    }
}

#[derive(Clone)]
pub struct EgressOperationStore {
    inner: Arc<StoreInner>,
}

impl EgressOperationStore {
    pub fn new(registry: Arc<EgressProviderRegistry>, limits: RequestLimitTracker) -> Self {
        Self::build(registry, limits, None)
    }

    /// A store with the limits from `config`.
    pub fn from_config(config: &GlobalConfig, registry: Arc<EgressProviderRegistry>) -> Self {
        let limits = config
            .limits
            .iter()
            .map(|(key, limit)| (key.clone(), *limit))
            .collect();
        Self::new(
            registry,
            RequestLimitTracker::new(limits, default_operation_limit),
        )
    }

    /// Publish status changes on `events_tx`.
    ///
    /// Operations already added to `self` are not carried over.
    pub fn with_events(self, events_tx: mpsc::Sender<Event>) -> Self {
        Self::build(
            Arc::clone(&self.inner.registry),
            self.inner.limits.clone(),
            Some(events_tx),
        )
    }

    fn build(
        registry: Arc<EgressProviderRegistry>,
        limits: RequestLimitTracker,
        events_tx: Option<mpsc::Sender<Event>>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(HashMap::new()),
                limits,
                registry,
                shutdown: CancellationToken::new(),
                events_tx,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<EgressProviderRegistry> {
        &self.inner.registry
    }

    pub fn limits(&self) -> &RequestLimitTracker {
        &self.inner.limits
    }

    /// Admit an operation and run it in the background.
    ///
    /// # Arguments
    ///
    /// * `operation` - The egress operation to run
    /// * `limit_key` - Concurrency limit key, normally the artifact type
    ///
    /// # Returns
    ///
    /// The new operation id. Poll it with [`get_operation_status`](Self::get_operation_status).
    ///
    /// # Errors
    ///
    /// `TooManyRequests` if the limit for `limit_key` is reached; the
    /// operation is not started.
    pub fn add_operation(
        &self,
        operation: EgressOperation,
        limit_key: &str,
    ) -> OperationStoreResult<Uuid> {
        let token = self.inner.shutdown.child_token();
        self.admit(operation, limit_key, token, None)
    }

    /// Admit an operation and hand back a handle to await its result.
    ///
    /// Cancelling `token` cancels the operation.
    pub fn register_operation(
        &self,
        operation: EgressOperation,
        limit_key: &str,
        token: &CancellationToken,
    ) -> OperationStoreResult<PendingOperation> {
        let (completion_tx, completion) = oneshot::channel();
        let operation_id = self.admit(operation, limit_key, token.child_token(), Some(completion_tx))?;
        Ok(PendingOperation {
            operation_id,
            completion,
        })
    }

    /// Admit an operation and wait for it to finish.
    pub async fn execute_operation(
        &self,
        operation: EgressOperation,
        limit_key: &str,
        token: &CancellationToken,
    ) -> OperationStoreResult<EgressResult> {
        let pending = self.register_operation(operation, limit_key, token)?;
        Ok(pending.wait().await?)
    }

    fn admit(
        &self,
        operation: EgressOperation,
        limit_key: &str,
        token: CancellationToken,
        completion: Option<oneshot::Sender<ExecutionResult>>,
    ) -> OperationStoreResult<Uuid> {
        let guard = self.inner.limits.try_acquire(limit_key).ok_or_else(|| {
            OperationStoreError::TooManyRequests {
                limit_key: limit_key.to_string(),
                limit: self.inner.limits.limit(limit_key),
            }
        })?;

        let operation_id = Uuid::new_v4();
        let operation = Arc::new(operation);
        let status = OperationStatus {
            operation_id,
            created_at: Utc::now(),
            status: OperationState::Running,
            egress_provider_name: Some(operation.provider_name().to_string()),
            is_stoppable: operation.is_stoppable(),
            process: Some(operation.process().clone()),
            tags: operation.tags().clone(),
            resource_location: None,
            error: None,
        };

        self.inner.entries.lock().insert(
            operation_id,
            OperationEntry {
                status,
                operation: Arc::clone(&operation),
                token: token.clone(),
            },
        );
        self.publish(operation_id, OperationState::Running);

        let span = tracing::info_span!(
            "egress_operation",
            operation_id = %operation_id,
            artifact_type = %operation.artifact_type(),
            provider = %operation.provider_name(),
        );
        let store = self.clone();
        tokio::spawn(
            async move {
                store
                    .run(operation_id, operation, token, guard, completion)
                    .await;
            }
            .instrument(span),
        );

        Ok(operation_id)
    }

    async fn run(
        &self,
        operation_id: Uuid,
        operation: Arc<EgressOperation>,
        token: CancellationToken,
        guard: RequestLimitGuard,
        completion: Option<oneshot::Sender<ExecutionResult>>,
    ) {
        tracing::debug!("egress operation started");
        // Providers observe the token and remove partial artifacts before
        // returning, so the slot is only released after that cleanup.
        let result = match operation.execute(&self.inner.registry, token.clone()).await {
            Err(_) if token.is_cancelled() => Err(EgressError::Cancelled),
            result => result,
        };

        let final_state = {
            let mut entries = self.inner.entries.lock();
            entries.get_mut(&operation_id).map(|entry| {
                if !entry.status.status.is_terminal() {
                    match &result {
                        Ok(egress) => {
                            entry.status.status = OperationState::Succeeded;
                            entry.status.resource_location = Some(egress.value.clone());
                        }
                        Err(EgressError::Cancelled) => {
                            entry.status.status = OperationState::Cancelled;
                        }
                        Err(e) => {
                            entry.status.status = OperationState::Failed;
                            entry.status.error = Some(OperationError {
                                code: e.code().to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                entry.status.status
            })
        };
        drop(guard);

        match &result {
            Ok(egress) => tracing::info!(location = %egress.value, "egress operation succeeded"),
            Err(EgressError::Cancelled) => tracing::info!("egress operation cancelled"),
            Err(e) => tracing::warn!(error = %e, "egress operation failed"),
        }

        if let Some(state) = final_state {
            self.publish_async(operation_id, state).await;
        }
        if let Some(completion) = completion {
            let _ = completion.send(result);
        }
    }

    /// Current status of an operation.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn get_operation_status(&self, operation_id: Uuid) -> OperationStoreResult<OperationStatus> {
        self.inner
            .entries
            .lock()
            .get(&operation_id)
            .map(|entry| entry.status.clone())
            .ok_or(OperationStoreError::NotFound(operation_id))
    }

    /// Cancel a running operation. The operation is reported as `Cancelled`
    /// immediately; its task unwinds in the background.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidState` if the operation already
    /// finished.
    pub fn cancel_operation(&self, operation_id: Uuid) -> OperationStoreResult<()> {
        {
            let mut entries = self.inner.entries.lock();
            let entry = entries
                .get_mut(&operation_id)
                .ok_or(OperationStoreError::NotFound(operation_id))?;
            if entry.status.status.is_terminal() {
                return Err(OperationStoreError::InvalidState {
                    id: operation_id,
                    state: entry.status.status,
                    action: "cancelled",
                });
            }
            entry.status.status = OperationState::Cancelled;
            entry.token.cancel();
        }
        tracing::info!(operation_id = %operation_id, "egress operation cancellation requested");
        self.publish(operation_id, OperationState::Cancelled);
        Ok(())
    }

    /// Ask a running operation to wind down and egress what it has.
    ///
    /// Returns once the request is recorded; the stop itself happens in the
    /// background. If stopping fails, `on_failure` is called with the error
    /// and the operation stays in `Stopping`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `NotStoppable`, or `InvalidState` when the operation is not
    /// running.
    pub fn stop_operation<F>(&self, operation_id: Uuid, on_failure: F) -> OperationStoreResult<()>
    where
        F: FnOnce(EgressError) + Send + 'static,
    {
        let operation = {
            let mut entries = self.inner.entries.lock();
            let entry = entries
                .get_mut(&operation_id)
                .ok_or(OperationStoreError::NotFound(operation_id))?;
            if entry.status.status != OperationState::Running {
                return Err(OperationStoreError::InvalidState {
                    id: operation_id,
                    state: entry.status.status,
                    action: "stopped",
                });
            }
            if !entry.status.is_stoppable {
                return Err(OperationStoreError::NotStoppable(operation_id));
            }
            entry.status.status = OperationState::Stopping;
            Arc::clone(&entry.operation)
        };
        self.publish(operation_id, OperationState::Stopping);

        tokio::spawn(async move {
            if let Err(e) = operation.stop().await {
                tracing::warn!(operation_id = %operation_id, error = %e, "failed to stop egress operation");
                on_failure(e);
            }
        });
        Ok(())
    }

    /// Snapshot of all operations, oldest first.
    ///
    /// # Arguments
    ///
    /// * `process_key` - Only operations on a matching process
    /// * `tags` - Only operations carrying every one of these tags
    pub fn get_operations(
        &self,
        process_key: Option<&ProcessKey>,
        tags: Option<&BTreeSet<String>>,
    ) -> Vec<OperationSummary> {
        let mut summaries: Vec<OperationSummary> = self
            .inner
            .entries
            .lock()
            .values()
            .filter(|entry| {
                process_key.map_or(true, |key| {
                    entry
                        .status
                        .process
                        .as_ref()
                        .map_or(false, |process| key.matches(process))
                })
            })
            .filter(|entry| tags.map_or(true, |tags| tags.is_subset(&entry.status.tags)))
            .map(|entry| entry.status.summary())
            .collect();
        summaries.sort_by_key(|summary| summary.created_at);
        summaries
    }

    /// Cancel every operation that is still running.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn publish(&self, operation_id: Uuid, status: OperationState) {
        if let Some(tx) = &self.inner.events_tx {
            let _ = tx.try_send(Event::OperationStatusChanged {
                operation_id,
                status,
            });
        }
    }

    async fn publish_async(&self, operation_id: Uuid, status: OperationState) {
        if let Some(tx) = &self.inner.events_tx {
            let _ = tx
                .send(Event::OperationStatusChanged {
                    operation_id,
                    status,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::operation::EgressPayload;
    use crate::egress::provider::{EgressArtifactSettings, EgressProvider, EgressSource};
    use crate::operation::ArtifactWriter;
    use async_trait::async_trait;
    use dm_protocol::process_models::ProcessInfo;
    use std::time::Duration;
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    /// Accepts everything and returns the byte count.
    struct CountingProvider;

    #[async_trait]
    impl EgressProvider for CountingProvider {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn egress(
            &self,
            source: EgressSource,
            _settings: &EgressArtifactSettings,
            token: CancellationToken,
        ) -> Result<String, EgressError> {
            let mut sink = Vec::new();
            source.write_into(&mut sink, token).await?;
            Ok(format!("{} bytes", sink.len()))
        }
    }

    /// Writes once, then waits until released or cancelled.
    struct GateWriter {
        release: CancellationToken,
    }

    #[async_trait]
    impl ArtifactWriter for GateWriter {
        async fn write_artifact(
            &self,
            output: &mut (dyn AsyncWrite + Send + Unpin),
            token: CancellationToken,
        ) -> Result<(), EgressError> {
            output.write_all(b"abc").await?;
            tokio::select! {
                _ = self.release.cancelled() => Ok(()),
                _ = token.cancelled() => Err(EgressError::Cancelled),
            }
        }
    }

    fn process() -> ProcessInfo {
        ProcessInfo {
            pid: 42,
            uid: Uuid::new_v4(),
            name: "svc".to_string(),
            command_line: String::new(),
        }
    }

    fn create_test_store() -> EgressOperationStore {
        let registry = Arc::new(EgressProviderRegistry::new());
        registry.register("count", Arc::new(CountingProvider));
        EgressOperationStore::new(
            registry,
            RequestLimitTracker::new(HashMap::from([("dump".to_string(), 1)]), |_| 2),
        )
    }

    fn gated(release: &CancellationToken, provider: &str) -> EgressOperation {
        EgressOperation::new(
            EgressPayload::Writer {
                writer: Arc::new(GateWriter {
                    release: release.clone(),
                }),
                file_name: "a.bin".to_string(),
                content_type: "application/octet-stream".to_string(),
                artifact_type: "dump".to_string(),
            },
            provider,
            process(),
        )
    }

    async fn wait_terminal(store: &EgressOperationStore, id: Uuid) -> OperationStatus {
        for _ in 0..200 {
            let status = store.get_operation_status(id).unwrap();
            if status.status.is_terminal() && store.limits().in_flight("dump") == 0 {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("operation {id} did not finish");
    }

    #[tokio::test]
    async fn test_second_operation_rejected_until_first_finishes() {
        let store = create_test_store();
        let release = CancellationToken::new();

        let first = store.add_operation(gated(&release, "count"), "dump").unwrap();
        let rejected = store.add_operation(gated(&release, "count"), "dump");
        assert_eq!(
            rejected,
            Err(OperationStoreError::TooManyRequests {
                limit_key: "dump".to_string(),
                limit: 1
            })
        );
        assert_eq!(store.get_operations(None, None).len(), 1);

        release.cancel();
        let status = wait_terminal(&store, first).await;
        assert!(status.is_ready());
        assert_eq!(status.resource_location.as_deref(), Some("3 bytes"));

        assert!(store.add_operation(gated(&release, "count"), "dump").is_ok());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_slot_released() {
        let store = create_test_store();
        let release = CancellationToken::new();
        release.cancel();

        let id = store.add_operation(gated(&release, "missing"), "dump").unwrap();
        let status = wait_terminal(&store, id).await;

        assert_eq!(status.status, OperationState::Failed);
        assert_eq!(status.error.unwrap().code, "ProviderNotFound");
        assert!(store.add_operation(gated(&release, "count"), "dump").is_ok());
    }

    #[tokio::test]
    async fn test_cancel_operation() {
        let store = create_test_store();
        let release = CancellationToken::new();
        let id = store.add_operation(gated(&release, "count"), "dump").unwrap();

        store.cancel_operation(id).unwrap();
        assert_eq!(
            store.get_operation_status(id).unwrap().status,
            OperationState::Cancelled
        );

        let status = wait_terminal(&store, id).await;
        assert_eq!(status.status, OperationState::Cancelled);
        assert!(matches!(
            store.cancel_operation(id),
            Err(OperationStoreError::InvalidState { .. })
        ));
        assert!(matches!(
            store.cancel_operation(Uuid::new_v4()),
            Err(OperationStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_requires_stoppable_operation() {
        let store = create_test_store();
        let release = CancellationToken::new();
        let id = store.add_operation(gated(&release, "count"), "dump").unwrap();

        assert_eq!(
            store.stop_operation(id, |_| {}),
            Err(OperationStoreError::NotStoppable(id))
        );
        assert!(matches!(
            store.stop_operation(Uuid::new_v4(), |_| {}),
            Err(OperationStoreError::NotFound(_))
        ));
        release.cancel();
    }

    #[tokio::test]
    async fn test_execute_operation_waits_for_result() {
        let store = create_test_store();
        let release = CancellationToken::new();
        release.cancel();

        let result = store
            .execute_operation(gated(&release, "count"), "dump", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.value, "3 bytes");
    }

    #[tokio::test]
    async fn test_get_operations_filters() {
        let store = create_test_store();
        let release = CancellationToken::new();
        let tagged = gated(&release, "count").with_tags(["nightly".to_string()]);
        store.add_operation(tagged, "other").unwrap();
        store.add_operation(gated(&release, "count"), "other").unwrap();

        let nightly = BTreeSet::from(["nightly".to_string()]);
        assert_eq!(store.get_operations(None, Some(&nightly)).len(), 1);
        assert_eq!(
            store
                .get_operations(Some(&ProcessKey::from_pid(42)), None)
                .len(),
            2
        );
        assert!(store
            .get_operations(Some(&ProcessKey::from_pid(7)), None)
            .is_empty());
        release.cancel();
    }
}
