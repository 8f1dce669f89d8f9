//! Public collection rule state.
//!
//! The engine tracks a finer-grained micro-state per rule; this is the
//! user-facing projection of it.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Coarse state of a collection rule as reported to users.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
pub enum CollectionRuleState {
    /// Waiting for the trigger.
    Running,
    /// The action list is currently executing.
    ActionExecuting,
    /// The action-count limit was reached within the sliding window.
    Throttled,
    /// The rule will no longer react to its trigger.
    Finished,
}

/// State of a collection rule together with a human-readable reason.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRuleDescription {
    pub state: CollectionRuleState,
    pub state_reason: String,
}

/// Detailed description of a collection rule, including limit bookkeeping.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRuleDetailedDescription {
    pub state: CollectionRuleState,
    pub state_reason: String,

    /// Number of times the action list ran since the rule started.
    #[ts(type = "number")]
    pub lifetime_occurrences: u64,

    /// Number of times the action list ran within the current sliding window.
    #[ts(type = "number")]
    pub sliding_window_occurrences: u64,

    pub action_count_limit: u32,

    #[ts(type = "number | null")]
    pub action_count_sliding_window_duration_limit_secs: Option<u64>,

    /// Seconds until the oldest execution leaves the sliding window.
    #[ts(type = "number | null")]
    pub sliding_window_duration_countdown_secs: Option<u64>,

    /// Seconds until the rule duration limit is reached.
    #[ts(type = "number | null")]
    pub rule_finished_countdown_secs: Option<u64>,
}

impl CollectionRuleDetailedDescription {
    pub fn description(&self) -> CollectionRuleDescription {
        CollectionRuleDescription {
            state: self.state,
            state_reason: self.state_reason.clone(),
        }
    }
}
