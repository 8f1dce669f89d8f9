//! Target process capability.
//!
//! The engine never speaks the diagnostics wire protocol itself. Everything it
//! needs from a monitored process goes through the [`TargetProcess`] trait:
//! producing artifact streams, reading and writing environment variables,
//! loading profilers, and resuming a process that was started suspended.

pub mod capture;
pub mod simulated;

pub use capture::{
    CaptureRequest, DumpType, EventFormat, EventProvider, LogLevel, MetricProvider, StackFormat,
    TraceProfile,
};
pub use simulated::SimulatedTarget;

use async_trait::async_trait;
use dm_protocol::process_models::ProcessInfo;
use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// An artifact produced by a target process, as an opaque byte stream.
pub type ArtifactStream = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Target process {0} is no longer available")]
    ProcessExited(u32),
    #[error("Diagnostics request failed: {0}")]
    RequestFailed(String),
    #[error("Not supported by the target process: {0}")]
    NotSupported(String),
    #[error("Diagnostics request was cancelled")]
    Cancelled,
}

/// Capability set of a monitored process.
///
/// `stop` asks a streaming capture to end early while still producing a
/// well-formed artifact; `token` aborts the request outright.
#[async_trait]
pub trait TargetProcess: Send + Sync {
    fn info(&self) -> &ProcessInfo;

    async fn capture(
        &self,
        request: CaptureRequest,
        stop: CancellationToken,
        token: CancellationToken,
    ) -> Result<ArtifactStream, TargetError>;

    async fn get_environment(&self) -> Result<HashMap<String, String>, TargetError>;

    /// Sets (or, when `value` is `None`, removes) an environment variable.
    async fn set_environment_variable(
        &self,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), TargetError>;

    async fn load_profiler(&self, clsid: Uuid, path: &Path) -> Result<(), TargetError>;

    async fn resume_runtime(&self) -> Result<(), TargetError>;
}
