//! Artifact egress.
//!
//! This module moves artifacts out of the monitor and into configured sinks:
//!
//! - [`provider`]: the [`EgressProvider`] abstraction and artifact settings
//! - [`filesystem`], [`s3`], [`azure_blob`], [`extension`]: provider kinds
//! - [`registry`]: providers by name, resolved at execution time
//! - [`operation`]: an artifact producer paired with a provider name
//! - [`store`]: admission-controlled registry of running and finished operations

pub mod azure_blob;
pub mod error;
pub mod extension;
pub mod filesystem;
pub mod limits;
pub mod operation;
pub mod provider;
pub mod registry;
pub mod s3;
pub mod store;

pub use error::{EgressError, EgressOutcome};
pub use extension::{ExtensionEgressProvider, ExtensionEgressResult};
pub use filesystem::FileSystemEgressProvider;
pub use limits::{RequestLimitGuard, RequestLimitTracker};
pub use operation::{
    CollectionRuleMetadata, EgressOperation, EgressPayload, EgressResult, ExecutionResult,
};
pub use provider::{EgressArtifactSettings, EgressProvider, EgressSource};
pub use registry::{EgressProviderRegistry, InMemorySinkClients, SinkClientFactory};
pub use store::{EgressOperationStore, OperationStoreError, OperationStoreResult, PendingOperation};
