//! `Execute` action: runs an external program.

use super::base::{
    ActionError, ActionExecutor, ActionStartedSignal, CollectionRuleActionResult,
    ValidationFailure,
};
use super::registry::{ActionInvocation, ActionSettings};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Output key holding the process exit code.
pub const EXIT_CODE_OUTPUT: &str = "ExitCode";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ExecuteOptions {
    /// Executable path, or a name resolved through `PATH`.
    pub path: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    /// When set, a non-zero exit code is reported but not treated as failure.
    #[serde(default)]
    pub ignore_exit_code: bool,
}

impl ExecuteOptions {
    pub(crate) fn into_executor(self, _invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        Arc::new(ExecuteAction { options: self })
    }
}

impl ActionSettings for ExecuteOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        if self.path.trim().is_empty() {
            vec![ValidationFailure::new("path", "an executable path is required")]
        } else {
            Vec::new()
        }
    }
}

pub struct ExecuteAction {
    options: ExecuteOptions,
}

#[async_trait]
impl ActionExecutor for ExecuteAction {
    async fn execute(
        &self,
        started: ActionStartedSignal,
        token: CancellationToken,
    ) -> Result<CollectionRuleActionResult, ActionError> {
        let path = &self.options.path;
        let program = which::which(path).map_err(|_| {
            ActionError::Execution(format!("The executable path '{path}' does not exist"))
        })?;

        let mut child = Command::new(&program)
            .args(&self.options.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ActionError::Execution(format!("Failed to start '{path}': {e}")))?;
        tracing::debug!(program = %program.display(), pid = ?child.id(), "process started");
        started.signal();

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| ActionError::Execution(format!("Failed to wait for '{path}': {e}")))?,
            _ = token.cancelled() => {
                let _ = child.kill().await;
                return Err(ActionError::Cancelled);
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 && !self.options.ignore_exit_code {
            return Err(ActionError::Execution(format!(
                "The process exited with exit code {exit_code}"
            )));
        }

        Ok(CollectionRuleActionResult::with_output(
            EXIT_CODE_OUTPUT,
            exit_code.to_string(),
        ))
    }
}
