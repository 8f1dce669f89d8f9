//! Action list executor.
//!
//! Runs one rule's action list for a single trigger firing. Actions run
//! strictly in order; the first failure stops the list and is reported with
//! the failing action's index. Every action is disposed whatever the outcome.

use super::actions::{
    ActionError, ActionInvocation, ActionRegistry, CollectionRuleAction,
    CollectionRuleActionResult,
};
use super::context::CollectionRuleContext;
use super::tokens::{self, ActionOutputs};
use dm_protocol::ipc::Event;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionListError {
    /// The action at `action_index` failed; later actions were not started.
    #[error("Action {action_index} ({action_type}) failed: {source}")]
    Execution {
        action_index: usize,
        action_type: String,
        #[source]
        source: ActionError,
    },

    #[error("Action list execution was cancelled")]
    Cancelled,
}

impl ActionListError {
    pub fn action_index(&self) -> Option<usize> {
        match self {
            ActionListError::Execution { action_index, .. } => Some(*action_index),
            ActionListError::Cancelled => None,
        }
    }
}

/// Fires the wrapped callback at most once.
struct StartCallback<F>(Option<F>);

impl<F: FnOnce()> StartCallback<F> {
    fn fire(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }
}

struct Deferred {
    index: usize,
    action_type: String,
    name: Option<String>,
    action: CollectionRuleAction,
}

pub struct ActionListExecutor {
    registry: Arc<ActionRegistry>,
}

impl ActionListExecutor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }

    /// Run every action of `context`'s rule.
    ///
    /// # Arguments
    ///
    /// * `context` - The rule being executed
    /// * `start_callback` - Invoked exactly once: after the first action
    ///   started, or before returning if no action got that far
    /// * `token` - Cancels the in-flight action and skips the rest
    ///
    /// # Returns
    ///
    /// The result of every action, in list order.
    ///
    /// # Errors
    ///
    /// `Execution` for the first failing action. `Cancelled` when `token`
    /// was cancelled.
    pub async fn execute_actions<F>(
        &self,
        context: &Arc<CollectionRuleContext>,
        start_callback: F,
        token: &CancellationToken,
    ) -> Result<Vec<CollectionRuleActionResult>, ActionListError>
    where
        F: FnOnce() + Send,
    {
        let mut callback = StartCallback(Some(start_callback));
        let mut deferred = Vec::new();

        let result = self
            .run(context, &mut callback, &mut deferred, token)
            .instrument(context.span.clone())
            .await;

        callback.fire();
        for pending in deferred {
            pending.action.dispose().await;
        }
        result
    }

    async fn run<F: FnOnce()>(
        &self,
        context: &Arc<CollectionRuleContext>,
        callback: &mut StartCallback<F>,
        deferred: &mut Vec<Deferred>,
        token: &CancellationToken,
    ) -> Result<Vec<CollectionRuleActionResult>, ActionListError> {
        let actions = &context.options.actions;
        let mut results = BTreeMap::new();
        let mut outputs = ActionOutputs::new();

        for (index, options) in actions.iter().enumerate() {
            if token.is_cancelled() {
                return Err(ActionListError::Cancelled);
            }
            let action_type = options.action_type.as_str();
            let fail = |source: ActionError| failure(index, action_type, source, token);

            let factory = self
                .registry
                .try_create_factory(action_type)
                .ok_or_else(|| fail(ActionError::UnknownAction(action_type.to_string())))?;
            let settings = tokens::substitute(&options.settings, context.process(), &outputs);
            let invocation = ActionInvocation {
                context: Arc::clone(context),
                action_index: index,
                action_name: options.name.clone(),
            };
            let executor = factory.create(invocation, &settings).map_err(fail)?;

            let mut action = CollectionRuleAction::new(executor);
            tracing::debug!(action_index = index, action_type, "starting action");
            context
                .emit(Event::ActionStarted {
                    rule_name: context.rule_name.clone(),
                    pid: context.process().pid,
                    action_index: index,
                    action_type: action_type.to_string(),
                })
                .await;

            let started = action.start(token).await;
            callback.fire();
            if let Err(e) = started {
                action.dispose().await;
                return Err(report_failure(context, index, fail(e)).await);
            }

            if !options.wait_for_completion {
                deferred.push(Deferred {
                    index,
                    action_type: action_type.to_string(),
                    name: options.name.clone(),
                    action,
                });
                continue;
            }

            let completed = action.wait_for_completion().await;
            action.dispose().await;
            match completed {
                Ok(result) => {
                    record(context, index, options.name.as_deref(), &result, &mut outputs).await;
                    results.insert(index, result);
                }
                Err(e) => return Err(report_failure(context, index, fail(e)).await),
            }
        }

        while !deferred.is_empty() {
            let Deferred {
                index,
                action_type,
                name,
                mut action,
            } = deferred.remove(0);
            let completed = action.wait_for_completion().await;
            action.dispose().await;
            match completed {
                Ok(result) => {
                    record(context, index, name.as_deref(), &result, &mut outputs).await;
                    results.insert(index, result);
                }
                Err(e) => {
                    let error = failure(index, &action_type, e, token);
                    return Err(report_failure(context, index, error).await);
                }
            }
        }

        Ok(results.into_values().collect())
    }
}

fn failure(
    action_index: usize,
    action_type: &str,
    source: ActionError,
    token: &CancellationToken,
) -> ActionListError {
    if source == ActionError::Cancelled && token.is_cancelled() {
        return ActionListError::Cancelled;
    }
    ActionListError::Execution {
        action_index,
        action_type: action_type.to_string(),
        source,
    }
}

async fn record(
    context: &CollectionRuleContext,
    index: usize,
    name: Option<&str>,
    result: &CollectionRuleActionResult,
    outputs: &mut ActionOutputs,
) {
    if let Some(name) = name {
        outputs.insert(name.to_string(), result.output_values.clone());
    }
    tracing::debug!(action_index = index, "action completed");
    context
        .emit(Event::ActionCompleted {
            rule_name: context.rule_name.clone(),
            pid: context.process().pid,
            action_index: index,
            output_values: result
                .output_values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
        .await;
}

async fn report_failure(
    context: &CollectionRuleContext,
    index: usize,
    error: ActionListError,
) -> ActionListError {
    if let ActionListError::Execution { source, .. } = &error {
        tracing::warn!(action_index = index, error = %source, "action failed");
        context
            .emit(Event::ActionFailed {
                rule_name: context.rule_name.clone(),
                pid: context.process().pid,
                action_index: index,
                error: source.to_string(),
            })
            .await;
    }
    error
}
