//! Collection rule validation.
//!
//! Everything that can be checked before a rule runs is checked here, so the
//! action list executor only ever sees registered action types with parsed,
//! valid options.

use super::actions::{ActionError, ActionRegistry, ValidationFailure};
use super::tokens;
use super::triggers::{TriggerError, TriggerKind};
use crate::egress::EgressProviderRegistry;
use dm_protocol::rule_models::CollectionRuleOptions;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("The rule name cannot be empty")]
    EmptyName,

    #[error("Another collection rule is already named '{0}'")]
    DuplicateRuleName(String),

    #[error("Trigger type '{0}' is not registered")]
    UnknownTrigger(String),

    #[error("Action {action_index}: type '{action_type}' is not registered")]
    UnknownAction {
        action_index: usize,
        action_type: String,
    },

    #[error("Action {action_index}: {failure}")]
    InvalidActionOptions {
        action_index: usize,
        failure: ValidationFailure,
    },

    #[error("Action {action_index}: the name '{name}' is already used by action {first_index}")]
    DuplicateActionName {
        action_index: usize,
        first_index: usize,
        name: String,
    },

    #[error("Action {action_index}: references outputs of '{name}', which is not an earlier action")]
    UnknownActionReference { action_index: usize, name: String },

    #[error("Action {action_index}: references outputs of '{name}', which does not wait for completion")]
    DeferredActionReference { action_index: usize, name: String },

    #[error("Action {action_index}: egress provider '{provider}' is not configured")]
    UnknownEgressProvider {
        action_index: usize,
        provider: String,
    },

    #[error("Invalid limits: {0}")]
    InvalidLimits(String),
}

/// Check `rule` against the registered actions and configured providers.
///
/// # Errors
///
/// Every problem found, not just the first.
pub fn validate_rule(
    rule: &CollectionRuleOptions,
    actions: &ActionRegistry,
    providers: &EgressProviderRegistry,
) -> Result<(), Vec<RuleValidationError>> {
    let mut errors = Vec::new();

    if rule.name.trim().is_empty() {
        errors.push(RuleValidationError::EmptyName);
    }
    if let Err(TriggerError::UnknownTrigger(trigger)) = TriggerKind::parse(&rule.trigger) {
        errors.push(RuleValidationError::UnknownTrigger(trigger));
    }
    validate_limits(rule, &mut errors);

    // name -> (index, waits for completion)
    let mut named: HashMap<&str, (usize, bool)> = HashMap::new();
    for (action_index, action) in rule.actions.iter().enumerate() {
        for name in tokens::referenced_actions(&action.settings) {
            match named.get(name.as_str()) {
                Some((_, true)) => {}
                Some((_, false)) => errors.push(RuleValidationError::DeferredActionReference {
                    action_index,
                    name,
                }),
                None => errors.push(RuleValidationError::UnknownActionReference {
                    action_index,
                    name,
                }),
            }
        }

        if let Some(name) = action.name.as_deref() {
            if let Some((first_index, _)) = named.get(name) {
                errors.push(RuleValidationError::DuplicateActionName {
                    action_index,
                    first_index: *first_index,
                    name: name.to_string(),
                });
            } else {
                named.insert(name, (action_index, action.wait_for_completion));
            }
        }

        match actions.try_validate_options(&action.action_type, &action.settings) {
            Ok(options) => {
                if let Some(provider) = options.egress_provider() {
                    if !providers.contains(provider) {
                        errors.push(RuleValidationError::UnknownEgressProvider {
                            action_index,
                            provider: provider.to_string(),
                        });
                    }
                }
            }
            Err(ActionError::UnknownAction(action_type)) => {
                errors.push(RuleValidationError::UnknownAction {
                    action_index,
                    action_type,
                });
            }
            Err(ActionError::InvalidOptions { failures, .. }) => {
                errors.extend(failures.into_iter().map(|failure| {
                    RuleValidationError::InvalidActionOptions {
                        action_index,
                        failure,
                    }
                }));
            }
            Err(other) => errors.push(RuleValidationError::InvalidActionOptions {
                action_index,
                failure: ValidationFailure::new("settings", other.to_string()),
            }),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_limits(rule: &CollectionRuleOptions, errors: &mut Vec<RuleValidationError>) {
    let limits = &rule.limits;
    if limits.action_count == Some(0) {
        errors.push(RuleValidationError::InvalidLimits(
            "action-count must be greater than zero".to_string(),
        ));
    }
    if limits.action_count_sliding_window_duration_secs == Some(0) {
        errors.push(RuleValidationError::InvalidLimits(
            "action-count-sliding-window-duration-secs must be greater than zero".to_string(),
        ));
    }
    if limits.rule_duration_secs == Some(0) {
        errors.push(RuleValidationError::InvalidLimits(
            "rule-duration-secs must be greater than zero".to_string(),
        ));
    }
}
