//! Events published by the engine.
//!
//! The rule service and the operation store report progress to their host
//! through a channel of [`Event`]s. The host decides what to do with them
//! (print them, forward them to a UI, record them).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;
use uuid::Uuid;

use crate::operation_models::OperationState;
use crate::rule_state_models::CollectionRuleState;

/// Events sent from the engine to its host.
///
/// Uses tagged enum serialization for TypeScript compatibility:
/// ```json
/// {
///   "type": "ruleStateChanged",
///   "payload": {
///     "rule_name": "startup-dump",
///     "pid": 4242,
///     "state": "ActionExecuting",
///     "reason": "..."
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A collection rule started listening to its trigger.
    RuleStarted { rule_name: String, pid: u32 },

    /// A collection rule's public state changed.
    RuleStateChanged {
        rule_name: String,
        pid: u32,
        state: CollectionRuleState,
        reason: String,
    },

    /// An action in a rule's action list was started.
    ActionStarted {
        rule_name: String,
        pid: u32,
        action_index: usize,
        action_type: String,
    },

    /// An action completed and produced output values.
    ActionCompleted {
        rule_name: String,
        pid: u32,
        action_index: usize,
        output_values: BTreeMap<String, String>,
    },

    /// An action failed; the rest of the list was skipped.
    ActionFailed {
        rule_name: String,
        pid: u32,
        action_index: usize,
        error: String,
    },

    /// A collection rule reached a terminal state.
    RuleFinished {
        rule_name: String,
        pid: u32,
        reason: String,
    },

    /// A tracked egress operation changed state.
    OperationStatusChanged {
        #[ts(type = "string")]
        operation_id: Uuid,
        status: OperationState,
    },
}
