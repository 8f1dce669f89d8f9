//! Collection rules.
//!
//! A collection rule pairs a trigger with an ordered action list and a set
//! of limits. This module runs them:
//!
//! - [`actions`]: action types, their options, and the action lifecycle
//! - [`executor`]: runs one action list in order
//! - [`state`]: the per-rule state machine
//! - [`triggers`]: startup and manual triggers
//! - [`pipeline`]: one rule's trigger / throttle / execute loop
//! - [`service`]: every rule of one target process
//! - [`validation`]: checks run before a rule starts
//! - [`tokens`]: `$(...)` substitution in action settings

pub mod actions;
pub mod context;
pub mod executor;
pub mod pipeline;
pub mod service;
pub mod state;
pub mod tokens;
pub mod triggers;
pub mod validation;

pub use context::CollectionRuleContext;
pub use executor::{ActionListError, ActionListExecutor};
pub use pipeline::{CollectionRulePipeline, RuleStateTracker, SharedRuleState};
pub use service::{CollectionRuleService, InvalidRule};
pub use state::{CollectionRuleStateHolder, MicroState, StateError, StateEvent};
pub use triggers::{ManualTriggerHandle, RuleTrigger, TriggerError, TriggerKind};
pub use validation::{validate_rule, RuleValidationError};
