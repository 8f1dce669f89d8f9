//! Collection rule models for `.diagmon/rules/*.yaml`.
//!
//! A collection rule pairs a trigger with an ordered list of actions and a set
//! of limits that bound how often, and for how long, the rule reacts.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::process_models::ProcessFilter;

/// Defines a full collection rule.
///
/// # Example
///
/// ```yaml
/// name: high-cpu-dump
/// filters:
///   - key: ProcessName
///     value: my-service
/// trigger:
///   type: Startup
/// actions:
///   - name: dump
///     type: CollectDump
///     settings:
///       egress: artifacts
///       dump-type: full
///   - type: Execute
///     settings:
///       path: /usr/bin/logger
///       arguments: ["dump written to $(Actions.dump.EgressPath)"]
/// limits:
///   action-count: 1
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "kebab-case")]
pub struct CollectionRuleOptions {
    /// Unique name identifying this rule.
    pub name: String,

    /// Process filters; the rule applies only to targets matching every filter.
    #[serde(default)]
    pub filters: Vec<ProcessFilter>,

    /// The condition that causes the action list to run.
    pub trigger: TriggerOptions,

    /// Ordered list of actions executed each time the trigger fires.
    #[serde(default)]
    pub actions: Vec<ActionOptions>,

    /// Throttling and lifetime limits.
    #[serde(default)]
    pub limits: LimitsOptions,
}

/// Trigger configuration for a collection rule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "kebab-case")]
pub struct TriggerOptions {
    /// Registered trigger type (e.g. `Startup`, `Manual`).
    #[serde(rename = "type")]
    pub trigger_type: String,

    /// Trigger-specific settings.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl TriggerOptions {
    pub fn new(trigger_type: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            settings: serde_json::Value::Null,
        }
    }
}

/// A single entry in a rule's action list.
///
/// `settings` is kept untyped here; the engine's action registry parses it
/// into the strongly-typed options of the action named by `action_type`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "kebab-case")]
pub struct ActionOptions {
    /// Optional name used to reference this action's output values from
    /// later actions, as in `$(Actions.<name>.<OutputKey>)`.
    #[serde(default)]
    pub name: Option<String>,

    /// Registered action type (e.g. `CollectDump`, `Execute`).
    #[serde(rename = "type")]
    pub action_type: String,

    /// Action-specific settings.
    #[serde(default)]
    pub settings: serde_json::Value,

    /// When `false`, the next action starts without waiting for this one to
    /// complete; the action is awaited after all others have started.
    #[serde(default = "default_wait_for_completion")]
    pub wait_for_completion: bool,
}

fn default_wait_for_completion() -> bool {
    true
}

impl ActionOptions {
    pub fn new(action_type: impl Into<String>, settings: serde_json::Value) -> Self {
        Self {
            name: None,
            action_type: action_type.into(),
            settings,
            wait_for_completion: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn deferred(mut self) -> Self {
        self.wait_for_completion = false;
        self
    }
}

/// Limits that bound how often a rule executes and how long it stays active.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case")]
pub struct LimitsOptions {
    /// Number of action list executions allowed. Within a sliding window when
    /// `action_count_sliding_window_duration_secs` is set, otherwise for the
    /// lifetime of the rule.
    #[serde(default)]
    pub action_count: Option<u32>,

    /// Length of the sliding window used for throttling.
    #[serde(default)]
    pub action_count_sliding_window_duration_secs: Option<u64>,

    /// Amount of time after which the rule stops listening to its trigger.
    #[serde(default)]
    pub rule_duration_secs: Option<u64>,
}

impl LimitsOptions {
    pub const DEFAULT_ACTION_COUNT: u32 = 5;

    pub fn effective_action_count(&self) -> u32 {
        self.action_count.unwrap_or(Self::DEFAULT_ACTION_COUNT)
    }
}
