//! Collection rule actions.
//!
//! - [`base`]: the action lifecycle wrapper and the [`ActionExecutor`] seam
//! - [`registry`]: action types by name and their options
//! - [`collect`], [`execute`], [`environment`], [`profiler`]: built-in actions

pub mod base;
pub mod collect;
pub mod environment;
pub mod execute;
pub mod profiler;
pub mod registry;

pub use base::{
    ActionError, ActionExecutor, ActionStartedSignal, ActionState, CollectionRuleAction,
    CollectionRuleActionResult, ValidationFailure,
};
pub use registry::{
    ActionFactory, ActionInvocation, ActionRegistry, ActionSettings, TypedActionFactory,
};

#[cfg(test)]
pub(crate) mod test_support {
    use super::ActionInvocation;
    use crate::egress::{EgressOperationStore, EgressProviderRegistry, RequestLimitTracker};
    use crate::rules::context::CollectionRuleContext;
    use crate::target::TargetProcess;
    use dm_protocol::config_models::default_operation_limit;
    use dm_protocol::rule_models::{CollectionRuleOptions, LimitsOptions, TriggerOptions};
    use std::collections::HashMap;
    use std::sync::Arc;

    pub(crate) fn create_test_invocation(target: Arc<dyn TargetProcess>) -> ActionInvocation {
        let store = EgressOperationStore::new(
            Arc::new(EgressProviderRegistry::new()),
            RequestLimitTracker::new(HashMap::new(), default_operation_limit),
        );
        let options = CollectionRuleOptions {
            name: "test-rule".to_string(),
            filters: Vec::new(),
            trigger: TriggerOptions::new("Manual"),
            actions: Vec::new(),
            limits: LimitsOptions::default(),
        };
        ActionInvocation {
            context: Arc::new(CollectionRuleContext::new(options, target, store)),
            action_index: 0,
            action_name: None,
        }
    }
}
