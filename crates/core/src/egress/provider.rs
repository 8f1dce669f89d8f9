//! The egress provider abstraction.
//!
//! A provider receives artifact bytes plus [`EgressArtifactSettings`] and
//! returns a location string identifying where the artifact ended up.
//! Artifact bytes arrive as an [`EgressSource`], which supports both calling
//! conventions: a writer that fills the stream the provider hands it, or a
//! readable stream the provider copies from.

use super::error::EgressError;
use crate::operation::ArtifactWriter;
use crate::target::ArtifactStream;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Read size used when pulling artifact bytes out of a source.
pub(crate) const COPY_BUFFER_SIZE: usize = 81920;

/// Settings describing one artifact being egressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressArtifactSettings {
    /// Target name (file name, object key, blob name).
    pub name: String,

    pub content_type: String,

    /// Sink-specific metadata (object tags, blob metadata, headers).
    /// Insertion order is preserved.
    pub metadata: Vec<(String, String)>,
}

impl EgressArtifactSettings {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Where artifact bytes come from.
pub enum EgressSource {
    /// The writer is handed the provider's output stream.
    Writer(Arc<dyn ArtifactWriter>),
    /// The provider copies from an existing stream.
    Stream(ArtifactStream),
}

impl EgressSource {
    /// Move all artifact bytes into `output` and flush it.
    pub async fn write_into(
        self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        token: CancellationToken,
    ) -> Result<(), EgressError> {
        match self {
            EgressSource::Writer(writer) => {
                tokio::select! {
                    written = writer.write_artifact(output, token.clone()) => written?,
                    _ = token.cancelled() => return Err(EgressError::Cancelled),
                }
            }
            EgressSource::Stream(mut stream) => {
                tokio::select! {
                    copied = tokio::io::copy(&mut stream, output) => {
                        copied?;
                    }
                    _ = token.cancelled() => return Err(EgressError::Cancelled),
                }
            }
        }
        output.flush().await?;
        Ok(())
    }
}

/// A pluggable artifact sink.
#[async_trait]
pub trait EgressProvider: Send + Sync {
    /// Provider kind, for display (`filesystem`, `s3_storage`, ...).
    fn kind(&self) -> &'static str;

    /// Deliver the artifact and return its location.
    ///
    /// On failure no partial artifact may remain visible at the sink.
    async fn egress(
        &self,
        source: EgressSource,
        settings: &EgressArtifactSettings,
        token: CancellationToken,
    ) -> Result<String, EgressError>;
}

/// A sink that consumes artifact bytes in chunks (multi-part and block uploads).
#[async_trait]
pub(crate) trait ChunkSink: Send {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), EgressError>;
}

/// Run `source` through an in-memory pipe and feed everything it produces
/// into `sink`.
///
/// Returns the sink's error if the sink failed (the producer then sees a
/// broken pipe), otherwise the producer's error. The caller decides whether
/// to finalize or abort the sink.
pub(crate) async fn pump_into<S: ChunkSink>(
    source: EgressSource,
    sink: &mut S,
    token: CancellationToken,
) -> Result<(), EgressError> {
    let (mut writer, mut reader) = tokio::io::duplex(COPY_BUFFER_SIZE);

    let produce = async move {
        let produced = source.write_into(&mut writer, token).await;
        let _ = writer.shutdown().await;
        produced
    };

    let consume = async move {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                return Ok::<(), EgressError>(());
            }
            sink.write_chunk(&buffer[..read]).await?;
        }
    };

    let (produced, consumed) = tokio::join!(produce, consume);
    consumed?;
    produced
}
