//! Artifact operations.
//!
//! An artifact operation is a cancellable unit of work that writes one
//! artifact (dump, trace, logs, ...) into an output stream. Egress operations
//! pair an artifact operation with the provider that receives the bytes.

pub mod capture;

pub use capture::CaptureOperation;

use crate::egress::EgressError;
use async_trait::async_trait;
use std::fmt;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Type of artifact an operation produces.
///
/// The string form doubles as the concurrency limit key in the operation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Dump,
    GcDump,
    Trace,
    Logs,
    LiveMetrics,
    Stacks,
    Exceptions,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Dump,
        ArtifactKind::GcDump,
        ArtifactKind::Trace,
        ArtifactKind::Logs,
        ArtifactKind::LiveMetrics,
        ArtifactKind::Stacks,
        ArtifactKind::Exceptions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Dump => "dump",
            ArtifactKind::GcDump => "gcdump",
            ArtifactKind::Trace => "trace",
            ArtifactKind::Logs => "logs",
            ArtifactKind::LiveMetrics => "livemetrics",
            ArtifactKind::Stacks => "stacks",
            ArtifactKind::Exceptions => "exceptions",
        }
    }

    /// Streaming artifacts can be stopped early and still egress successfully.
    pub fn is_stoppable(self) -> bool {
        matches!(
            self,
            ArtifactKind::Trace | ArtifactKind::Logs | ArtifactKind::LiveMetrics
        )
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can write an artifact into an output stream.
///
/// This is the "callback" form of artifact production: the egress provider
/// hands over the stream, the writer fills it.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    async fn write_artifact(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        token: CancellationToken,
    ) -> Result<(), EgressError>;
}

/// A stream-producing operation with its own artifact metadata.
#[async_trait]
pub trait ArtifactOperation: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    fn content_type(&self) -> &str;

    /// File name the artifact should be stored under.
    fn file_name(&self) -> &str;

    fn is_stoppable(&self) -> bool {
        self.kind().is_stoppable()
    }

    async fn execute(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        token: CancellationToken,
    ) -> Result<(), EgressError>;

    /// Ask the operation to wind down gracefully.
    async fn stop(&self) -> Result<(), EgressError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_kind_keys() {
        let keys: Vec<_> = ArtifactKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["dump", "gcdump", "trace", "logs", "livemetrics", "stacks", "exceptions"]
        );
        assert!(ArtifactKind::Trace.is_stoppable());
        assert!(!ArtifactKind::Dump.is_stoppable());
        assert_eq!(ArtifactKind::GcDump.to_string(), "gcdump");
    }
}
