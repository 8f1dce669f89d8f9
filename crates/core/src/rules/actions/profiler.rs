//! `LoadProfiler` action.

use super::base::{
    ActionError, ActionExecutor, ActionStartedSignal, CollectionRuleActionResult,
    ValidationFailure,
};
use super::registry::{ActionInvocation, ActionSettings};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LoadProfilerOptions {
    /// Path of the profiler library, as seen by the target process.
    pub path: PathBuf,
    pub clsid: Uuid,
}

impl LoadProfilerOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        Arc::new(LoadProfilerAction {
            options: self,
            invocation,
        })
    }
}

impl ActionSettings for LoadProfilerOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        if self.path.as_os_str().is_empty() {
            failures.push(ValidationFailure::new("path", "a profiler path is required"));
        }
        if self.clsid.is_nil() {
            failures.push(ValidationFailure::new("clsid", "must not be the nil id"));
        }
        failures
    }
}

pub struct LoadProfilerAction {
    options: LoadProfilerOptions,
    invocation: ActionInvocation,
}

#[async_trait]
impl ActionExecutor for LoadProfilerAction {
    async fn execute(
        &self,
        _started: ActionStartedSignal,
        _token: CancellationToken,
    ) -> Result<CollectionRuleActionResult, ActionError> {
        self.invocation
            .context
            .target
            .load_profiler(self.options.clsid, &self.options.path)
            .await
            .map_err(|e| ActionError::Execution(e.to_string()))?;
        tracing::info!(
            clsid = %self.options.clsid,
            path = %self.options.path.display(),
            "profiler loaded"
        );
        Ok(CollectionRuleActionResult::default())
    }
}
