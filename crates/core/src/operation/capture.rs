//! Artifact operation backed by a target process capture.

use super::{ArtifactKind, ArtifactOperation};
use crate::egress::EgressError;
use crate::target::{CaptureRequest, TargetProcess};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Captures one artifact from a target process and copies it to the output.
pub struct CaptureOperation {
    target: Arc<dyn TargetProcess>,
    request: CaptureRequest,
    file_name: String,
    stop: CancellationToken,
}

impl CaptureOperation {
    pub fn new(target: Arc<dyn TargetProcess>, request: CaptureRequest) -> Self {
        let file_name = format!(
            "{}_{}_{}.{}",
            request.kind(),
            target.info().pid,
            Utc::now().format("%Y%m%d_%H%M%S"),
            request.file_extension()
        );
        Self {
            target,
            request,
            file_name,
            stop: CancellationToken::new(),
        }
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }
}

#[async_trait]
impl ArtifactOperation for CaptureOperation {
    fn kind(&self) -> ArtifactKind {
        self.request.kind()
    }

    fn content_type(&self) -> &str {
        self.request.content_type()
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }

    async fn execute(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        token: CancellationToken,
    ) -> Result<(), EgressError> {
        let mut stream = self
            .target
            .capture(self.request.clone(), self.stop.clone(), token.clone())
            .await?;

        let copied = tokio::select! {
            copied = tokio::io::copy(&mut stream, output) => copied,
            _ = token.cancelled() => return Err(EgressError::Cancelled),
        };
        match copied {
            Ok(bytes) => {
                tracing::debug!(kind = %self.kind(), bytes, "artifact captured");
            }
            Err(_) if token.is_cancelled() => return Err(EgressError::Cancelled),
            Err(e) => return Err(e.into()),
        }

        output.flush().await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), EgressError> {
        if !self.is_stoppable() {
            return Err(EgressError::NotStoppable);
        }
        self.stop.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DumpType, SimulatedTarget};
    use std::time::Duration;

    #[tokio::test]
    async fn test_capture_operation_copies_dump() {
        let target = Arc::new(SimulatedTarget::with_pid(7, "svc").with_dump_size(4096));
        let operation = CaptureOperation::new(
            target,
            CaptureRequest::Dump {
                dump_type: DumpType::Full,
            },
        );

        assert!(operation.file_name().starts_with("dump_7_"));
        assert!(operation.file_name().ends_with(".dmp"));
        assert!(!operation.is_stoppable());

        let mut output = Vec::new();
        operation
            .execute(&mut output, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, SimulatedTarget::dump_bytes(4096));
    }

    #[tokio::test]
    async fn test_stop_ends_streaming_capture() {
        let target = Arc::new(
            SimulatedTarget::with_pid(7, "svc").with_stream_interval(Duration::from_millis(5)),
        );
        let operation = Arc::new(CaptureOperation::new(
            target,
            CaptureRequest::Trace {
                profiles: Vec::new(),
                providers: Vec::new(),
                request_rundown: false,
                buffer_size_mb: 256,
                duration: Duration::from_secs(600),
            },
        ));

        let stopper = Arc::clone(&operation);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.stop().await.unwrap();
        });

        let mut output = Vec::new();
        operation
            .execute(&mut output, CancellationToken::new())
            .await
            .unwrap();
        assert!(!output.is_empty());
    }

    #[tokio::test]
    async fn test_stop_rejected_for_dump() {
        let target = Arc::new(SimulatedTarget::with_pid(7, "svc"));
        let operation = CaptureOperation::new(target, CaptureRequest::GcDump);
        assert_eq!(operation.stop().await, Err(EgressError::NotStoppable));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_capture() {
        let target = Arc::new(
            SimulatedTarget::with_pid(7, "svc").with_stream_interval(Duration::from_millis(5)),
        );
        let operation = CaptureOperation::new(
            target,
            CaptureRequest::Logs {
                default_level: Default::default(),
                filter_specs: Default::default(),
                use_app_filters: false,
                format: Default::default(),
                duration: Duration::from_secs(600),
            },
        );

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let mut output = Vec::new();
        let result = operation.execute(&mut output, token).await;
        assert_eq!(result, Err(EgressError::Cancelled));
    }
}
