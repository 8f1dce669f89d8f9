//! Egress operations: "produce an artifact" paired with "send it there".

use super::provider::{EgressArtifactSettings, EgressSource};
use super::registry::EgressProviderRegistry;
use super::EgressError;
use crate::operation::{ArtifactOperation, ArtifactWriter};
use async_trait::async_trait;
use dm_protocol::process_models::ProcessInfo;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Location of a successfully egressed artifact, as assigned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressResult {
    pub value: String,
}

/// Outcome of one egress attempt. Provider failures are carried, not thrown.
pub type ExecutionResult = Result<EgressResult, EgressError>;

/// Identifies the collection rule action that created an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRuleMetadata {
    pub rule_name: String,
    pub action_index: usize,
    pub action_name: Option<String>,
}

/// How the artifact bytes get produced.
pub enum EgressPayload {
    /// An artifact operation with its own kind, content type and file name.
    Operation(Arc<dyn ArtifactOperation>),
    /// A bare writer callback with explicit metadata.
    Writer {
        writer: Arc<dyn ArtifactWriter>,
        file_name: String,
        content_type: String,
        artifact_type: String,
    },
}

struct OperationWriter(Arc<dyn ArtifactOperation>);

#[async_trait]
impl ArtifactWriter for OperationWriter {
    async fn write_artifact(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        token: CancellationToken,
    ) -> Result<(), EgressError> {
        self.0.execute(output, token).await
    }
}

pub struct EgressOperation {
    payload: EgressPayload,
    provider_name: String,
    process: ProcessInfo,
    tags: BTreeSet<String>,
    rule_metadata: Option<CollectionRuleMetadata>,
}

impl EgressOperation {
    pub fn new(payload: EgressPayload, provider_name: impl Into<String>, process: ProcessInfo) -> Self {
        Self {
            payload,
            provider_name: provider_name.into(),
            process,
            tags: BTreeSet::new(),
            rule_metadata: None,
        }
    }

    pub fn from_operation(
        operation: Arc<dyn ArtifactOperation>,
        provider_name: impl Into<String>,
        process: ProcessInfo,
    ) -> Self {
        Self::new(EgressPayload::Operation(operation), provider_name, process)
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_rule_metadata(mut self, metadata: CollectionRuleMetadata) -> Self {
        self.rule_metadata = Some(metadata);
        self
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn process(&self) -> &ProcessInfo {
        &self.process
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn rule_metadata(&self) -> Option<&CollectionRuleMetadata> {
        self.rule_metadata.as_ref()
    }

    /// Artifact type string, also used as the concurrency limit key.
    pub fn artifact_type(&self) -> &str {
        match &self.payload {
            EgressPayload::Operation(operation) => operation.kind().as_str(),
            EgressPayload::Writer { artifact_type, .. } => artifact_type,
        }
    }

    pub fn file_name(&self) -> &str {
        match &self.payload {
            EgressPayload::Operation(operation) => operation.file_name(),
            EgressPayload::Writer { file_name, .. } => file_name,
        }
    }

    pub fn content_type(&self) -> &str {
        match &self.payload {
            EgressPayload::Operation(operation) => operation.content_type(),
            EgressPayload::Writer { content_type, .. } => content_type,
        }
    }

    pub fn is_stoppable(&self) -> bool {
        match &self.payload {
            EgressPayload::Operation(operation) => operation.is_stoppable(),
            EgressPayload::Writer { .. } => false,
        }
    }

    /// Ask the artifact operation to end early.
    pub async fn stop(&self) -> Result<(), EgressError> {
        match &self.payload {
            EgressPayload::Operation(operation) => operation.stop().await,
            EgressPayload::Writer { .. } => Err(EgressError::NotStoppable),
        }
    }

    fn artifact_settings(&self) -> EgressArtifactSettings {
        let mut settings = EgressArtifactSettings::new(self.file_name(), self.content_type())
            .with_metadata("ArtifactType", self.artifact_type())
            .with_metadata("ProcessId", self.process.pid.to_string())
            .with_metadata("RuntimeInstanceCookie", self.process.uid.to_string());
        if let Some(rule) = &self.rule_metadata {
            settings = settings
                .with_metadata("CollectionRuleName", rule.rule_name.as_str())
                .with_metadata("CollectionRuleActionIndex", rule.action_index.to_string());
            if let Some(action_name) = &rule.action_name {
                settings = settings.with_metadata("CollectionRuleActionName", action_name.as_str());
            }
        }
        settings
    }

    /// Resolve the provider and egress the artifact.
    ///
    /// The provider is looked up now, so providers registered or reloaded
    /// after this operation was created are honoured.
    pub async fn execute(
        &self,
        registry: &EgressProviderRegistry,
        token: CancellationToken,
    ) -> ExecutionResult {
        let provider = registry.get(&self.provider_name)?;
        let writer: Arc<dyn ArtifactWriter> = match &self.payload {
            EgressPayload::Operation(operation) => Arc::new(OperationWriter(Arc::clone(operation))),
            EgressPayload::Writer { writer, .. } => Arc::clone(writer),
        };

        let value = provider
            .egress(
                EgressSource::Writer(writer),
                &self.artifact_settings(),
                token,
            )
            .await?;
        Ok(EgressResult { value })
    }
}
