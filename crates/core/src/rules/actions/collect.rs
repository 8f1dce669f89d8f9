//! Artifact collection actions.
//!
//! Every `Collect*` action captures one artifact from the target process and
//! sends it to a named egress provider through the operation store, so it is
//! subject to the same concurrency limits as API-initiated operations. The
//! action's `EgressPath` output is the location the provider reported.

use super::base::{
    ActionError, ActionExecutor, ActionStartedSignal, CollectionRuleActionResult,
    ValidationFailure,
};
use super::registry::{ActionInvocation, ActionSettings};
use crate::egress::{CollectionRuleMetadata, EgressError, EgressOperation, OperationStoreError};
use crate::operation::CaptureOperation;
use crate::target::{
    CaptureRequest, DumpType, EventFormat, EventProvider, LogLevel, MetricProvider, StackFormat,
    TraceProfile,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Output key holding the egressed artifact location.
pub const EGRESS_PATH_OUTPUT: &str = "EgressPath";

const DEFAULT_DURATION_SECS: u64 = 30;
const DEFAULT_BUFFER_SIZE_MEGABYTES: u32 = 256;
const MAX_BUFFER_SIZE_MEGABYTES: u32 = 1024;

fn default_duration_secs() -> u64 {
    DEFAULT_DURATION_SECS
}

fn default_buffer_size_megabytes() -> u32 {
    DEFAULT_BUFFER_SIZE_MEGABYTES
}

fn default_true() -> bool {
    true
}

fn validate_egress(egress: &str, failures: &mut Vec<ValidationFailure>) {
    if egress.trim().is_empty() {
        failures.push(ValidationFailure::new(
            "egress",
            "an egress provider name is required",
        ));
    }
}

fn validate_duration(duration_secs: u64, failures: &mut Vec<ValidationFailure>) {
    if duration_secs == 0 {
        failures.push(ValidationFailure::new(
            "duration-secs",
            "must be greater than zero",
        ));
    }
}

/// Captures an artifact and egresses it through the operation store.
pub struct CollectArtifactAction {
    invocation: ActionInvocation,
    egress: String,
    request: CaptureRequest,
}

impl CollectArtifactAction {
    pub fn new(invocation: ActionInvocation, egress: String, request: CaptureRequest) -> Self {
        Self {
            invocation,
            egress,
            request,
        }
    }

    fn into_executor(self) -> Arc<dyn ActionExecutor> {
        Arc::new(self)
    }
}

#[async_trait]
impl ActionExecutor for CollectArtifactAction {
    async fn execute(
        &self,
        started: ActionStartedSignal,
        token: CancellationToken,
    ) -> Result<CollectionRuleActionResult, ActionError> {
        let context = &self.invocation.context;
        let kind = self.request.kind();
        let capture = CaptureOperation::new(Arc::clone(&context.target), self.request.clone());
        let operation = EgressOperation::from_operation(
            Arc::new(capture),
            self.egress.as_str(),
            context.process().clone(),
        )
        .with_rule_metadata(CollectionRuleMetadata {
            rule_name: context.rule_name.clone(),
            action_index: self.invocation.action_index,
            action_name: self.invocation.action_name.clone(),
        });

        let pending = context
            .store
            .register_operation(operation, kind.as_str(), &token)
            .map_err(|e| match e {
                OperationStoreError::Execution(EgressError::Cancelled) => ActionError::Cancelled,
                other => ActionError::Execution(other.to_string()),
            })?;
        tracing::debug!(
            operation_id = %pending.operation_id,
            artifact_type = %kind,
            egress = %self.egress,
            "collection operation admitted"
        );
        started.signal();

        match pending.wait().await {
            Ok(result) => Ok(CollectionRuleActionResult::with_output(
                EGRESS_PATH_OUTPUT,
                result.value,
            )),
            Err(EgressError::Cancelled) => Err(ActionError::Cancelled),
            Err(e) => Err(ActionError::Execution(e.to_string())),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CollectDumpOptions {
    pub egress: String,
    #[serde(default)]
    pub dump_type: DumpType,
}

impl CollectDumpOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        CollectArtifactAction::new(
            invocation,
            self.egress,
            CaptureRequest::Dump {
                dump_type: self.dump_type,
            },
        )
        .into_executor()
    }
}

impl ActionSettings for CollectDumpOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        validate_egress(&self.egress, &mut failures);
        failures
    }

    fn egress_provider(&self) -> Option<&str> {
        Some(&self.egress)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CollectGcDumpOptions {
    pub egress: String,
}

impl CollectGcDumpOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        CollectArtifactAction::new(invocation, self.egress, CaptureRequest::GcDump).into_executor()
    }
}

impl ActionSettings for CollectGcDumpOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        validate_egress(&self.egress, &mut failures);
        failures
    }

    fn egress_provider(&self) -> Option<&str> {
        Some(&self.egress)
    }
}

/// A trace uses either predefined profiles or an explicit provider list.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CollectTraceOptions {
    pub egress: String,
    #[serde(default)]
    pub profile: Vec<TraceProfile>,
    #[serde(default)]
    pub providers: Vec<EventProvider>,
    #[serde(default = "default_true")]
    pub request_rundown: bool,
    #[serde(default = "default_buffer_size_megabytes")]
    pub buffer_size_megabytes: u32,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

impl CollectTraceOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        CollectArtifactAction::new(
            invocation,
            self.egress,
            CaptureRequest::Trace {
                profiles: self.profile,
                providers: self.providers,
                request_rundown: self.request_rundown,
                buffer_size_mb: self.buffer_size_megabytes,
                duration: Duration::from_secs(self.duration_secs),
            },
        )
        .into_executor()
    }
}

impl ActionSettings for CollectTraceOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        validate_egress(&self.egress, &mut failures);
        validate_duration(self.duration_secs, &mut failures);

        match (self.profile.is_empty(), self.providers.is_empty()) {
            (true, true) => failures.push(ValidationFailure::new(
                "profile",
                "either profile or providers must be specified",
            )),
            (false, false) => failures.push(ValidationFailure::new(
                "providers",
                "profile and providers cannot both be specified",
            )),
            _ => {}
        }
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.name.trim().is_empty() {
                failures.push(ValidationFailure::new(
                    format!("providers[{i}].name"),
                    "a provider name is required",
                ));
            }
        }

        if !(1..=MAX_BUFFER_SIZE_MEGABYTES).contains(&self.buffer_size_megabytes) {
            failures.push(ValidationFailure::new(
                "buffer-size-megabytes",
                format!("must be between 1 and {MAX_BUFFER_SIZE_MEGABYTES}"),
            ));
        }
        failures
    }

    fn egress_provider(&self) -> Option<&str> {
        Some(&self.egress)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CollectLogsOptions {
    pub egress: String,
    #[serde(default)]
    pub default_level: LogLevel,
    /// Per-category minimum levels, overriding `default-level`.
    #[serde(default)]
    pub filter_specs: BTreeMap<String, LogLevel>,
    #[serde(default = "default_true")]
    pub use_app_filters: bool,
    #[serde(default)]
    pub format: EventFormat,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

impl CollectLogsOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        CollectArtifactAction::new(
            invocation,
            self.egress,
            CaptureRequest::Logs {
                default_level: self.default_level,
                filter_specs: self.filter_specs,
                use_app_filters: self.use_app_filters,
                format: self.format,
                duration: Duration::from_secs(self.duration_secs),
            },
        )
        .into_executor()
    }
}

impl ActionSettings for CollectLogsOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        validate_egress(&self.egress, &mut failures);
        validate_duration(self.duration_secs, &mut failures);
        if self.filter_specs.keys().any(|category| category.trim().is_empty()) {
            failures.push(ValidationFailure::new(
                "filter-specs",
                "category names cannot be empty",
            ));
        }
        failures
    }

    fn egress_provider(&self) -> Option<&str> {
        Some(&self.egress)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CollectLiveMetricsOptions {
    pub egress: String,
    #[serde(default = "default_true")]
    pub include_default_providers: bool,
    #[serde(default)]
    pub providers: Vec<MetricProvider>,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

impl CollectLiveMetricsOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        CollectArtifactAction::new(
            invocation,
            self.egress,
            CaptureRequest::LiveMetrics {
                include_default_providers: self.include_default_providers,
                providers: self.providers,
                duration: Duration::from_secs(self.duration_secs),
            },
        )
        .into_executor()
    }
}

impl ActionSettings for CollectLiveMetricsOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        validate_egress(&self.egress, &mut failures);
        validate_duration(self.duration_secs, &mut failures);
        if !self.include_default_providers && self.providers.is_empty() {
            failures.push(ValidationFailure::new(
                "providers",
                "at least one provider is required when default providers are excluded",
            ));
        }
        failures
    }

    fn egress_provider(&self) -> Option<&str> {
        Some(&self.egress)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CollectStacksOptions {
    pub egress: String,
    #[serde(default)]
    pub format: StackFormat,
}

impl CollectStacksOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        CollectArtifactAction::new(
            invocation,
            self.egress,
            CaptureRequest::Stacks {
                format: self.format,
            },
        )
        .into_executor()
    }
}

impl ActionSettings for CollectStacksOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        validate_egress(&self.egress, &mut failures);
        failures
    }

    fn egress_provider(&self) -> Option<&str> {
        Some(&self.egress)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CollectExceptionsOptions {
    pub egress: String,
    #[serde(default)]
    pub format: EventFormat,
}

impl CollectExceptionsOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        CollectArtifactAction::new(
            invocation,
            self.egress,
            CaptureRequest::Exceptions {
                format: self.format,
            },
        )
        .into_executor()
    }
}

impl ActionSettings for CollectExceptionsOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        validate_egress(&self.egress, &mut failures);
        failures
    }

    fn egress_provider(&self) -> Option<&str> {
        Some(&self.egress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::{EgressOperationStore, EgressProviderRegistry, FileSystemEgressProvider};
    use crate::egress::RequestLimitTracker;
    use crate::rules::context::CollectionRuleContext;
    use crate::target::SimulatedTarget;
    use dm_protocol::config_models::{default_operation_limit, FileSystemEgressProviderOptions};
    use dm_protocol::operation_models::OperationState;
    use dm_protocol::rule_models::{CollectionRuleOptions, LimitsOptions, TriggerOptions};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn create_test_invocation(dir: &TempDir, limits: HashMap<String, u32>) -> ActionInvocation {
        let registry = Arc::new(EgressProviderRegistry::new());
        registry.register(
            "local",
            Arc::new(FileSystemEgressProvider::new(FileSystemEgressProviderOptions {
                directory_path: dir.path().to_path_buf(),
                intermediate_directory_path: None,
                copy_buffer_size: None,
            })),
        );
        let store = EgressOperationStore::new(
            registry,
            RequestLimitTracker::new(limits, default_operation_limit),
        );
        let options = CollectionRuleOptions {
            name: "collect-test".to_string(),
            filters: Vec::new(),
            trigger: TriggerOptions::new("Startup"),
            actions: Vec::new(),
            limits: LimitsOptions::default(),
        };
        let target = Arc::new(SimulatedTarget::with_pid(77, "svc").with_dump_size(4096));
        ActionInvocation {
            context: Arc::new(CollectionRuleContext::new(options, target, store)),
            action_index: 0,
            action_name: Some("dump".to_string()),
        }
    }

    #[test]
    fn test_trace_defaults() {
        let options: CollectTraceOptions =
            serde_json::from_value(serde_json::json!({ "egress": "local", "profile": ["cpu"] }))
                .unwrap();
        assert!(options.request_rundown);
        assert_eq!(options.buffer_size_megabytes, 256);
        assert_eq!(options.duration_secs, 30);
        assert!(options.validate().is_empty());
    }

    #[test]
    fn test_trace_requires_profile_or_providers() {
        let options: CollectTraceOptions =
            serde_json::from_value(serde_json::json!({ "egress": "local" })).unwrap();
        let failures = options.validate();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].field, "profile");
    }

    #[test]
    fn test_live_metrics_requires_some_provider() {
        let options: CollectLiveMetricsOptions = serde_json::from_value(serde_json::json!({
            "egress": "local",
            "include-default-providers": false,
        }))
        .unwrap();
        assert_eq!(options.validate()[0].field, "providers");
    }

    #[tokio::test]
    async fn test_collect_dump_egresses_artifact() {
        let dir = TempDir::new().unwrap();
        let invocation = create_test_invocation(&dir, HashMap::new());
        let store = invocation.context.store.clone();
        let options = CollectDumpOptions {
            egress: "local".to_string(),
            dump_type: DumpType::Mini,
        };
        let executor = options.into_executor(invocation);

        let (started, _rx) = ActionStartedSignal::new();
        let result = executor
            .execute(started, CancellationToken::new())
            .await
            .unwrap();

        let path = &result.output_values[EGRESS_PATH_OUTPUT];
        assert_eq!(std::fs::read(path).unwrap(), SimulatedTarget::dump_bytes(4096));

        let operations = store.get_operations(None, None);
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].status, OperationState::Succeeded);
    }

    #[tokio::test]
    async fn test_collect_rejected_when_limit_reached() {
        let dir = TempDir::new().unwrap();
        let mut limits = HashMap::new();
        limits.insert("dump".to_string(), 0);
        let invocation = create_test_invocation(&dir, limits);
        let executor = CollectDumpOptions {
            egress: "local".to_string(),
            dump_type: DumpType::Mini,
        }
        .into_executor(invocation);

        let (started, _rx) = ActionStartedSignal::new();
        let result = executor.execute(started, CancellationToken::new()).await;
        match result {
            Err(ActionError::Execution(message)) => assert!(message.contains("Too many")),
            other => panic!("expected Execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_collect_unknown_provider_fails() {
        let dir = TempDir::new().unwrap();
        let invocation = create_test_invocation(&dir, HashMap::new());
        let executor = CollectGcDumpOptions {
            egress: "missing".to_string(),
        }
        .into_executor(invocation);

        let (started, _rx) = ActionStartedSignal::new();
        let result = executor.execute(started, CancellationToken::new()).await;
        assert!(matches!(result, Err(ActionError::Execution(_))));
    }
}
