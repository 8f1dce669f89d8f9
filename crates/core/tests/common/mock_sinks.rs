//! Mock artifact producers and egress providers.

use async_trait::async_trait;
use dm_core::egress::{EgressArtifactSettings, EgressError, EgressProvider, EgressSource};
use dm_core::operation::ArtifactWriter;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Writes `total` bytes in `chunk`-sized writes. Byte `i` is `i % 251`.
#[allow(dead_code)]
pub struct ChunkedWriter {
    pub total: usize,
    pub chunk: usize,
}

#[allow(dead_code)]
pub fn expected_bytes(total: usize) -> Vec<u8> {
    (0..total).map(|i| (i % 251) as u8).collect()
}

#[async_trait]
impl ArtifactWriter for ChunkedWriter {
    async fn write_artifact(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        _token: CancellationToken,
    ) -> Result<(), EgressError> {
        let content = expected_bytes(self.total);
        for chunk in content.chunks(self.chunk.max(1)) {
            output.write_all(chunk).await?;
        }
        Ok(())
    }
}

/// Writes `written` bytes and then fails.
#[allow(dead_code)]
pub struct FailingWriter {
    pub written: usize,
}

#[async_trait]
impl ArtifactWriter for FailingWriter {
    async fn write_artifact(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        _token: CancellationToken,
    ) -> Result<(), EgressError> {
        output.write_all(&expected_bytes(self.written)).await?;
        Err(EgressError::Artifact("producer failed".to_string()))
    }
}

/// Writes and flushes `written` bytes, then holds until cancelled.
#[allow(dead_code)]
pub struct StallingWriter {
    pub written: usize,
}

#[async_trait]
impl ArtifactWriter for StallingWriter {
    async fn write_artifact(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        token: CancellationToken,
    ) -> Result<(), EgressError> {
        output.write_all(&expected_bytes(self.written)).await?;
        output.flush().await?;
        token.cancelled().await;
        Err(EgressError::Cancelled)
    }
}

/// Writes a few bytes and holds until `release` or cancellation.
#[allow(dead_code)]
pub struct GateWriter {
    pub release: CancellationToken,
}

#[async_trait]
impl ArtifactWriter for GateWriter {
    async fn write_artifact(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        token: CancellationToken,
    ) -> Result<(), EgressError> {
        output.write_all(b"gate").await?;
        tokio::select! {
            _ = self.release.cancelled() => Ok(()),
            _ = token.cancelled() => Err(EgressError::Cancelled),
        }
    }
}

/// Reads everything and reports the byte count as the location.
#[allow(dead_code)]
pub struct DiscardProvider;

#[async_trait]
impl EgressProvider for DiscardProvider {
    fn kind(&self) -> &'static str {
        "discard"
    }

    async fn egress(
        &self,
        source: EgressSource,
        _settings: &EgressArtifactSettings,
        token: CancellationToken,
    ) -> Result<String, EgressError> {
        let mut sink = Vec::new();
        source.write_into(&mut sink, token).await?;
        Ok(format!("discarded {} bytes", sink.len()))
    }
}
