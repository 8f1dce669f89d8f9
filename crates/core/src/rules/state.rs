//! Collection rule state machine.
//!
//! One rule holds exactly one [`MicroState`]. Events drive it through a
//! single transition table; every `FinishedVia*` state is terminal.
//!
//! What happens after an action list run is an [`OutcomeTransition`] policy.
//! By default both success and failure re-arm the rule (`Running`). Under
//! `RetainOutcome` the rule parks in `ActionSucceeded` / `ActionFailed`,
//! which still accept the next `BeginActionExecution`. Neither policy makes
//! a failed run terminal; only `RuleFailure` does that.

use dm_protocol::config_models::OutcomeTransition;
use dm_protocol::rule_state_models::{CollectionRuleDescription, CollectionRuleState};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicroState {
    Running,
    ActionStarted,
    ActionFailed,
    ActionSucceeded,
    Throttled,
    FinishedViaConfigChange,
    FinishedViaRuleDuration,
    FinishedViaStartup,
    FinishedViaFailure,
    FinishedViaActionCount,
}

impl MicroState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            MicroState::FinishedViaConfigChange
                | MicroState::FinishedViaRuleDuration
                | MicroState::FinishedViaStartup
                | MicroState::FinishedViaFailure
                | MicroState::FinishedViaActionCount
        )
    }

    /// Public state this micro-state projects to.
    pub fn public_state(self) -> CollectionRuleState {
        match self {
            MicroState::Running | MicroState::ActionSucceeded | MicroState::ActionFailed => {
                CollectionRuleState::Running
            }
            MicroState::ActionStarted => CollectionRuleState::ActionExecuting,
            MicroState::Throttled => CollectionRuleState::Throttled,
            _ => CollectionRuleState::Finished,
        }
    }
}

impl fmt::Display for MicroState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events that drive a rule's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    BeginActionExecution,
    ActionExecutionSucceeded,
    ActionExecutionFailed(String),
    BeginThrottled,
    EndThrottled,
    StartupTriggerCompleted,
    RuleDurationReached,
    ActionCountReached,
    ConfigurationChanged,
    RuleFailure(String),
}

impl StateEvent {
    fn name(&self) -> &'static str {
        match self {
            StateEvent::BeginActionExecution => "BeginActionExecution",
            StateEvent::ActionExecutionSucceeded => "ActionExecutionSucceeded",
            StateEvent::ActionExecutionFailed(_) => "ActionExecutionFailed",
            StateEvent::BeginThrottled => "BeginThrottled",
            StateEvent::EndThrottled => "EndThrottled",
            StateEvent::StartupTriggerCompleted => "StartupTriggerCompleted",
            StateEvent::RuleDurationReached => "RuleDurationReached",
            StateEvent::ActionCountReached => "ActionCountReached",
            StateEvent::ConfigurationChanged => "ConfigurationChanged",
            StateEvent::RuleFailure(_) => "RuleFailure",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("The rule already finished ({0})")]
    AlreadyFinished(MicroState),

    #[error("Event {event} is not valid in state {from}")]
    InvalidTransition {
        from: MicroState,
        event: &'static str,
    },
}

/// Current micro-state of one rule plus the reason it was entered.
#[derive(Debug, Clone)]
pub struct CollectionRuleStateHolder {
    state: MicroState,
    policy: OutcomeTransition,
    failure_message: Option<String>,
}

impl CollectionRuleStateHolder {
    pub fn new(policy: OutcomeTransition) -> Self {
        Self {
            state: MicroState::Running,
            policy,
            failure_message: None,
        }
    }

    pub fn state(&self) -> MicroState {
        self.state
    }

    /// Apply `event`, returning the new state.
    ///
    /// # Errors
    ///
    /// `AlreadyFinished` once any `FinishedVia*` state was reached,
    /// `InvalidTransition` when the event does not apply to the current
    /// state. The state is unchanged on error.
    pub fn apply(&mut self, event: StateEvent) -> Result<MicroState, StateError> {
        use MicroState as S;

        if self.state.is_finished() {
            return Err(StateError::AlreadyFinished(self.state));
        }
        let invalid = StateError::InvalidTransition {
            from: self.state,
            event: event.name(),
        };

        let next = match (self.state, event) {
            (
                S::Running | S::Throttled | S::ActionSucceeded | S::ActionFailed,
                StateEvent::BeginActionExecution,
            ) => {
                self.failure_message = None;
                S::ActionStarted
            }
            (S::ActionStarted, StateEvent::ActionExecutionSucceeded) => match self.policy {
                OutcomeTransition::ReturnToRunning => S::Running,
                OutcomeTransition::RetainOutcome => S::ActionSucceeded,
            },
            (S::ActionStarted, StateEvent::ActionExecutionFailed(message)) => {
                self.failure_message = Some(message);
                match self.policy {
                    OutcomeTransition::ReturnToRunning => S::Running,
                    OutcomeTransition::RetainOutcome => S::ActionFailed,
                }
            }
            (S::ActionStarted, StateEvent::BeginThrottled) => return Err(invalid),
            (_, StateEvent::BeginThrottled) => S::Throttled,
            (S::Throttled, StateEvent::EndThrottled) => S::Running,
            (state, StateEvent::EndThrottled) => state,
            (_, StateEvent::StartupTriggerCompleted) => S::FinishedViaStartup,
            (_, StateEvent::RuleDurationReached) => S::FinishedViaRuleDuration,
            (_, StateEvent::ActionCountReached) => S::FinishedViaActionCount,
            (_, StateEvent::ConfigurationChanged) => S::FinishedViaConfigChange,
            (_, StateEvent::RuleFailure(message)) => {
                self.failure_message = Some(message);
                S::FinishedViaFailure
            }
            _ => return Err(invalid),
        };

        self.state = next;
        Ok(next)
    }

    /// Public projection of the current state with a human-readable reason.
    pub fn description(&self) -> CollectionRuleDescription {
        let state_reason = match self.state {
            MicroState::Running => match &self.failure_message {
                Some(message) => {
                    format!("The rule is waiting for its trigger. The last run failed: {message}")
                }
                None => "The rule is waiting for its trigger.".to_string(),
            },
            MicroState::ActionStarted => "The rule's actions are executing.".to_string(),
            MicroState::ActionSucceeded => {
                "The rule's last action list run succeeded; waiting for its trigger.".to_string()
            }
            MicroState::ActionFailed => format!(
                "The rule's last action list run failed: {}",
                self.failure_message.as_deref().unwrap_or("unknown error")
            ),
            MicroState::Throttled => {
                "The rule reached its action count limit within the sliding window.".to_string()
            }
            MicroState::FinishedViaConfigChange => {
                "The rule finished because its configuration changed.".to_string()
            }
            MicroState::FinishedViaRuleDuration => {
                "The rule finished because its duration limit was reached.".to_string()
            }
            MicroState::FinishedViaStartup => {
                "The rule finished after its startup trigger ran.".to_string()
            }
            MicroState::FinishedViaFailure => format!(
                "The rule failed: {}",
                self.failure_message.as_deref().unwrap_or("unknown error")
            ),
            MicroState::FinishedViaActionCount => {
                "The rule finished because its action count limit was reached.".to_string()
            }
        };

        CollectionRuleDescription {
            state: self.state.public_state(),
            state_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_success_returns_to_running() {
        let mut holder = CollectionRuleStateHolder::new(OutcomeTransition::ReturnToRunning);
        assert_eq!(holder.apply(StateEvent::BeginActionExecution), Ok(MicroState::ActionStarted));
        assert_eq!(
            holder.description().state,
            CollectionRuleState::ActionExecuting
        );
        assert_eq!(holder.apply(StateEvent::ActionExecutionSucceeded), Ok(MicroState::Running));
    }

    #[test]
    fn test_failure_policies() {
        let mut holder = CollectionRuleStateHolder::new(OutcomeTransition::ReturnToRunning);
        holder.apply(StateEvent::BeginActionExecution).unwrap();
        assert_eq!(
            holder.apply(StateEvent::ActionExecutionFailed("exit code 1".to_string())),
            Ok(MicroState::Running)
        );
        assert!(holder.description().state_reason.contains("exit code 1"));

        let mut holder = CollectionRuleStateHolder::new(OutcomeTransition::RetainOutcome);
        holder.apply(StateEvent::BeginActionExecution).unwrap();
        assert_eq!(
            holder.apply(StateEvent::ActionExecutionFailed("exit code 1".to_string())),
            Ok(MicroState::ActionFailed)
        );
        assert_eq!(holder.description().state, CollectionRuleState::Running);
        assert_eq!(holder.apply(StateEvent::BeginActionExecution), Ok(MicroState::ActionStarted));
    }

    #[test]
    fn test_end_throttled_only_from_throttled() {
        let mut holder = CollectionRuleStateHolder::new(OutcomeTransition::ReturnToRunning);
        assert_eq!(holder.apply(StateEvent::EndThrottled), Ok(MicroState::Running));
        assert_eq!(holder.apply(StateEvent::BeginThrottled), Ok(MicroState::Throttled));
        assert_eq!(holder.description().state, CollectionRuleState::Throttled);
        assert_eq!(holder.apply(StateEvent::EndThrottled), Ok(MicroState::Running));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut holder = CollectionRuleStateHolder::new(OutcomeTransition::ReturnToRunning);
        assert_eq!(
            holder.apply(StateEvent::ActionExecutionSucceeded),
            Err(StateError::InvalidTransition {
                from: MicroState::Running,
                event: "ActionExecutionSucceeded",
            })
        );
        holder.apply(StateEvent::BeginActionExecution).unwrap();
        assert!(holder.apply(StateEvent::BeginThrottled).is_err());
        assert!(holder.apply(StateEvent::BeginActionExecution).is_err());
        assert_eq!(holder.state(), MicroState::ActionStarted);
    }

    #[test]
    fn test_finished_states() {
        let cases = [
            (StateEvent::StartupTriggerCompleted, MicroState::FinishedViaStartup),
            (StateEvent::RuleDurationReached, MicroState::FinishedViaRuleDuration),
            (StateEvent::ActionCountReached, MicroState::FinishedViaActionCount),
            (StateEvent::ConfigurationChanged, MicroState::FinishedViaConfigChange),
            (StateEvent::RuleFailure("boom".to_string()), MicroState::FinishedViaFailure),
        ];
        for (event, expected) in cases {
            let mut holder = CollectionRuleStateHolder::new(OutcomeTransition::ReturnToRunning);
            assert_eq!(holder.apply(event), Ok(expected));
            assert_eq!(holder.description().state, CollectionRuleState::Finished);
            assert_eq!(
                holder.apply(StateEvent::BeginActionExecution),
                Err(StateError::AlreadyFinished(expected))
            );
        }
    }

    fn any_event() -> impl Strategy<Value = StateEvent> {
        prop_oneof![
            Just(StateEvent::BeginActionExecution),
            Just(StateEvent::ActionExecutionSucceeded),
            Just(StateEvent::ActionExecutionFailed("failed".to_string())),
            Just(StateEvent::BeginThrottled),
            Just(StateEvent::EndThrottled),
            Just(StateEvent::StartupTriggerCompleted),
            Just(StateEvent::RuleDurationReached),
            Just(StateEvent::ActionCountReached),
            Just(StateEvent::ConfigurationChanged),
            Just(StateEvent::RuleFailure("failed".to_string())),
        ]
    }

    proptest! {
        #[test]
        fn prop_finished_states_are_terminal(
            events in proptest::collection::vec(any_event(), 0..40),
            retain in any::<bool>(),
        ) {
            let policy = if retain {
                OutcomeTransition::RetainOutcome
            } else {
                OutcomeTransition::ReturnToRunning
            };
            let mut holder = CollectionRuleStateHolder::new(policy);
            let mut finished: Option<MicroState> = None;

            for event in events {
                let result = holder.apply(event);
                if let Some(state) = finished {
                    prop_assert_eq!(result, Err(StateError::AlreadyFinished(state)));
                    prop_assert_eq!(holder.state(), state);
                } else if holder.state().is_finished() {
                    finished = Some(holder.state());
                }
            }
        }
    }
}
