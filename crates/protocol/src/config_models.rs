//! Global configuration models for `.diagmon/config.toml`.
//!
//! This module defines the structure of the global configuration file that
//! controls concurrency limits, the configured egress providers, and
//! engine-wide rule defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use ts_rs::TS;

/// Represents global settings from `.diagmon/config.toml`.
///
/// # Example
///
/// ```toml
/// # .diagmon/config.toml
/// [limits]
/// dump = 1
/// trace = 2
///
/// [egress.filesystem.artifacts]
/// directory_path = "/var/diagmon/artifacts"
///
/// [rules]
/// outcome_transition = "retain_outcome"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct GlobalConfig {
    /// Maximum number of concurrent operations per artifact type.
    ///
    /// Artifact types not listed fall back to [`default_operation_limit`].
    #[serde(default)]
    pub limits: BTreeMap<String, u32>,

    /// Configured egress providers, grouped by kind and keyed by name.
    #[serde(default)]
    pub egress: EgressConfig,

    /// Engine-wide collection rule defaults.
    #[serde(default)]
    pub rules: RuleDefaults,
}

impl GlobalConfig {
    /// Concurrency limit for the given artifact type.
    pub fn operation_limit(&self, limit_key: &str) -> u32 {
        self.limits
            .get(limit_key)
            .copied()
            .unwrap_or_else(|| default_operation_limit(limit_key))
    }
}

/// Built-in concurrency limit for an artifact type.
///
/// Dumps and other process-pausing artifacts default to one at a time;
/// streaming artifacts default to three.
pub fn default_operation_limit(limit_key: &str) -> u32 {
    match limit_key {
        "dump" | "gcdump" | "stacks" | "exceptions" => 1,
        "trace" | "logs" | "livemetrics" => 3,
        _ => u32::MAX,
    }
}

/// All egress providers configured for this host.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct EgressConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FileSystemEgressProviderOptions>,

    #[serde(default)]
    pub s3_storage: BTreeMap<String, S3StorageEgressProviderOptions>,

    #[serde(default)]
    pub azure_blob_storage: BTreeMap<String, AzureBlobEgressProviderOptions>,

    #[serde(default)]
    pub extension: BTreeMap<String, ExtensionEgressProviderOptions>,
}

impl EgressConfig {
    /// Names of every configured provider, with their kind.
    pub fn provider_names(&self) -> Vec<(String, &'static str)> {
        let mut names = Vec::new();
        names.extend(self.filesystem.keys().map(|n| (n.clone(), "filesystem")));
        names.extend(self.s3_storage.keys().map(|n| (n.clone(), "s3_storage")));
        names.extend(
            self.azure_blob_storage
                .keys()
                .map(|n| (n.clone(), "azure_blob_storage")),
        );
        names.extend(self.extension.keys().map(|n| (n.clone(), "extension")));
        names
    }
}

/// Options for writing artifacts to a local directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct FileSystemEgressProviderOptions {
    /// Directory the artifacts are written to.
    pub directory_path: PathBuf,

    /// When set, artifacts are written here first and moved into
    /// `directory_path` once complete.
    #[serde(default)]
    pub intermediate_directory_path: Option<PathBuf>,

    /// Buffer size used when copying the artifact stream.
    #[serde(default)]
    pub copy_buffer_size: Option<usize>,
}

/// Options for uploading artifacts to an S3-compatible bucket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct S3StorageEgressProviderOptions {
    pub bucket_name: String,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Size of the in-memory part buffer. Never smaller than the sink's
    /// minimum part size.
    #[serde(default)]
    pub upload_buffer_size: Option<usize>,

    /// Return a time-limited pre-signed URL instead of a bucket/key descriptor.
    #[serde(default)]
    pub generate_presigned_url: bool,

    #[serde(default)]
    #[ts(type = "number | null")]
    pub presigned_url_expiry_secs: Option<u64>,
}

impl S3StorageEgressProviderOptions {
    pub const DEFAULT_PRESIGNED_URL_EXPIRY_SECS: u64 = 3600;

    pub fn presigned_url_expiry_secs(&self) -> u64 {
        self.presigned_url_expiry_secs
            .unwrap_or(Self::DEFAULT_PRESIGNED_URL_EXPIRY_SECS)
    }
}

/// Options for uploading artifacts as Azure block blobs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct AzureBlobEgressProviderOptions {
    pub account_uri: String,

    pub container_name: String,

    /// Optional virtual directory prepended to blob names.
    #[serde(default)]
    pub blob_prefix: Option<String>,

    #[serde(default)]
    pub upload_buffer_size: Option<usize>,

    /// Metadata attached to every blob written by this provider.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Options for delegating egress to an external extension program.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ExtensionEgressProviderOptions {
    /// Executable name or path of the extension.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Free-form settings forwarded to the extension.
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// What the rule state machine does after an action list run completes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTransition {
    /// Success and failure both return the rule to `Running`.
    #[default]
    ReturnToRunning,
    /// The rule stays in `ActionSucceeded` / `ActionFailed` until the next trigger.
    RetainOutcome,
}

/// Engine-wide collection rule defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, TS)]
pub struct RuleDefaults {
    #[serde(default)]
    pub outcome_transition: OutcomeTransition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_limit_defaults() {
        let config = GlobalConfig::default();
        assert_eq!(config.operation_limit("dump"), 1);
        assert_eq!(config.operation_limit("trace"), 3);
        assert_eq!(config.operation_limit("custom"), u32::MAX);
    }

    #[test]
    fn test_operation_limit_override() {
        let mut config = GlobalConfig::default();
        config.limits.insert("dump".to_string(), 4);
        assert_eq!(config.operation_limit("dump"), 4);
    }
}
