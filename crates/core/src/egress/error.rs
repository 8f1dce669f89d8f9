//! Error types for artifact egress.

use crate::target::TargetError;
use thiserror::Error;

/// Errors that can occur while producing an artifact or delivering it to a sink.
///
/// `Clone` so that one failure can be handed to every party waiting on an
/// operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EgressError {
    /// No provider is registered under the requested name.
    #[error("Egress provider '{0}' does not exist")]
    ProviderNotFound(String),

    /// The sink rejected or failed the upload.
    #[error("Egress provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// Reading or writing artifact bytes failed.
    #[error("I/O error during egress: {0}")]
    Io(String),

    /// The target process could not produce the artifact.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The artifact writer failed for a reason of its own.
    #[error("Artifact production failed: {0}")]
    Artifact(String),

    /// A stop was requested on an operation that does not support it.
    #[error("This artifact operation cannot be stopped")]
    NotStoppable,

    #[error("Egress was cancelled")]
    Cancelled,
}

impl EgressError {
    pub fn provider(provider: &str, message: impl Into<String>) -> Self {
        EgressError::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-readable code reported on failed operations.
    pub fn code(&self) -> &'static str {
        match self {
            EgressError::ProviderNotFound(_) => "ProviderNotFound",
            EgressError::Provider { .. } => "EgressFailed",
            EgressError::Io(_) => "IoError",
            EgressError::Target(_) => "TargetError",
            EgressError::Artifact(_) => "ArtifactFailed",
            EgressError::NotStoppable => "NotStoppable",
            EgressError::Cancelled => "Cancelled",
        }
    }
}

impl From<std::io::Error> for EgressError {
    fn from(error: std::io::Error) -> Self {
        EgressError::Io(error.to_string())
    }
}

/// Type alias for Result with EgressError.
pub type EgressOutcome<T> = Result<T, EgressError>;
