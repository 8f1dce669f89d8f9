//! Environment variable actions against the target process.

use super::base::{
    ActionError, ActionExecutor, ActionStartedSignal, CollectionRuleActionResult,
    ValidationFailure,
};
use super::registry::{ActionInvocation, ActionSettings};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output key holding the value read by `GetEnvironmentVariable`.
pub const ENVIRONMENT_VARIABLE_VALUE_OUTPUT: &str = "EnvironmentVariableValue";

fn validate_name(name: &str) -> Vec<ValidationFailure> {
    if name.trim().is_empty() {
        vec![ValidationFailure::new("name", "a variable name is required")]
    } else if name.contains('=') {
        vec![ValidationFailure::new("name", "a variable name cannot contain '='")]
    } else {
        Vec::new()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SetEnvironmentVariableOptions {
    pub name: String,
    /// `None` removes the variable.
    #[serde(default)]
    pub value: Option<String>,
}

impl SetEnvironmentVariableOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        Arc::new(SetEnvironmentVariableAction {
            options: self,
            invocation,
        })
    }
}

impl ActionSettings for SetEnvironmentVariableOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        validate_name(&self.name)
    }
}

pub struct SetEnvironmentVariableAction {
    options: SetEnvironmentVariableOptions,
    invocation: ActionInvocation,
}

#[async_trait]
impl ActionExecutor for SetEnvironmentVariableAction {
    async fn execute(
        &self,
        _started: ActionStartedSignal,
        _token: CancellationToken,
    ) -> Result<CollectionRuleActionResult, ActionError> {
        self.invocation
            .context
            .target
            .set_environment_variable(&self.options.name, self.options.value.as_deref())
            .await
            .map_err(|e| ActionError::Execution(e.to_string()))?;
        tracing::debug!(name = %self.options.name, "environment variable set");
        Ok(CollectionRuleActionResult::default())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct GetEnvironmentVariableOptions {
    pub name: String,
}

impl GetEnvironmentVariableOptions {
    pub(crate) fn into_executor(self, invocation: ActionInvocation) -> Arc<dyn ActionExecutor> {
        Arc::new(GetEnvironmentVariableAction {
            options: self,
            invocation,
        })
    }
}

impl ActionSettings for GetEnvironmentVariableOptions {
    fn validate(&self) -> Vec<ValidationFailure> {
        validate_name(&self.name)
    }
}

pub struct GetEnvironmentVariableAction {
    options: GetEnvironmentVariableOptions,
    invocation: ActionInvocation,
}

#[async_trait]
impl ActionExecutor for GetEnvironmentVariableAction {
    async fn execute(
        &self,
        _started: ActionStartedSignal,
        _token: CancellationToken,
    ) -> Result<CollectionRuleActionResult, ActionError> {
        let name = &self.options.name;
        let mut environment = self
            .invocation
            .context
            .target
            .get_environment()
            .await
            .map_err(|e| ActionError::Execution(e.to_string()))?;

        let value = environment.remove(name).ok_or_else(|| {
            ActionError::Execution(format!(
                "The environment variable '{name}' is not set in the target process"
            ))
        })?;
        Ok(CollectionRuleActionResult::with_output(
            ENVIRONMENT_VARIABLE_VALUE_OUTPUT,
            value,
        ))
    }
}
