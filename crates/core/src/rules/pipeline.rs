//! Collection rule pipeline.
//!
//! Drives one rule for one target: wait for the trigger, apply the sliding
//! window throttle, run the action list, record the outcome, and decide
//! whether the rule keeps listening.

use super::context::CollectionRuleContext;
use super::executor::{ActionListError, ActionListExecutor};
use super::state::{CollectionRuleStateHolder, MicroState, StateEvent};
use super::triggers::{RuleTrigger, TriggerKind};
use dm_protocol::config_models::OutcomeTransition;
use dm_protocol::ipc::Event;
use dm_protocol::rule_models::LimitsOptions;
use dm_protocol::rule_state_models::{CollectionRuleDescription, CollectionRuleDetailedDescription};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Limit bookkeeping and state for one running rule.
pub struct RuleStateTracker {
    holder: CollectionRuleStateHolder,
    limits: LimitsOptions,
    started_at: Instant,
    executions: VecDeque<Instant>,
    lifetime_occurrences: u64,
}

impl RuleStateTracker {
    pub fn new(limits: LimitsOptions, policy: OutcomeTransition) -> Self {
        Self {
            holder: CollectionRuleStateHolder::new(policy),
            limits,
            started_at: Instant::now(),
            executions: VecDeque::new(),
            lifetime_occurrences: 0,
        }
    }

    pub fn state(&self) -> MicroState {
        self.holder.state()
    }

    pub fn description(&self) -> CollectionRuleDescription {
        self.holder.description()
    }

    fn sliding_window(&self) -> Option<Duration> {
        self.limits
            .action_count_sliding_window_duration_secs
            .map(Duration::from_secs)
    }

    fn prune(&mut self, now: Instant) {
        if let Some(window) = self.sliding_window() {
            while self
                .executions
                .front()
                .is_some_and(|oldest| *oldest + window <= now)
            {
                self.executions.pop_front();
            }
        }
    }

    /// When the sliding window is full, the instant its oldest entry expires.
    fn throttled_until(&mut self, now: Instant) -> Option<Instant> {
        let window = self.sliding_window()?;
        self.prune(now);
        let limit = self.limits.effective_action_count() as usize;
        if self.executions.len() >= limit {
            self.executions.front().map(|oldest| *oldest + window)
        } else {
            None
        }
    }

    fn record_execution(&mut self, now: Instant) {
        self.executions.push_back(now);
        self.lifetime_occurrences += 1;
    }

    fn lifetime_limit_reached(&self) -> bool {
        self.sliding_window().is_none()
            && self.lifetime_occurrences >= u64::from(self.limits.effective_action_count())
    }

    pub fn detailed_description(&self) -> CollectionRuleDetailedDescription {
        let now = Instant::now();
        let description = self.holder.description();
        let window = self.sliding_window();

        let in_window: Vec<Instant> = match window {
            Some(window) => self
                .executions
                .iter()
                .copied()
                .filter(|at| *at + window > now)
                .collect(),
            None => Vec::new(),
        };
        let sliding_window_occurrences = match window {
            Some(_) => in_window.len() as u64,
            None => self.lifetime_occurrences,
        };
        let sliding_window_duration_countdown_secs = window.and_then(|window| {
            in_window
                .first()
                .map(|oldest| (*oldest + window).saturating_duration_since(now).as_secs())
        });
        let rule_finished_countdown_secs = match self.limits.rule_duration_secs {
            Some(secs) if !self.holder.state().is_finished() => Some(
                (self.started_at + Duration::from_secs(secs))
                    .saturating_duration_since(now)
                    .as_secs(),
            ),
            _ => None,
        };

        CollectionRuleDetailedDescription {
            state: description.state,
            state_reason: description.state_reason,
            lifetime_occurrences: self.lifetime_occurrences,
            sliding_window_occurrences,
            action_count_limit: self.limits.effective_action_count(),
            action_count_sliding_window_duration_limit_secs: self
                .limits
                .action_count_sliding_window_duration_secs,
            sliding_window_duration_countdown_secs,
            rule_finished_countdown_secs,
        }
    }
}

pub type SharedRuleState = Arc<Mutex<RuleStateTracker>>;

/// Why the pipeline stopped waiting.
enum Interrupt {
    Cancelled,
    DurationReached,
}

pub struct CollectionRulePipeline {
    context: Arc<CollectionRuleContext>,
    executor: Arc<ActionListExecutor>,
    trigger: RuleTrigger,
    state: SharedRuleState,
}

impl CollectionRulePipeline {
    pub fn new(
        context: Arc<CollectionRuleContext>,
        executor: Arc<ActionListExecutor>,
        trigger: RuleTrigger,
        policy: OutcomeTransition,
    ) -> Self {
        let state = Arc::new(Mutex::new(RuleStateTracker::new(
            context.options.limits.clone(),
            policy,
        )));
        Self {
            context,
            executor,
            trigger,
            state,
        }
    }

    pub fn state(&self) -> SharedRuleState {
        Arc::clone(&self.state)
    }

    /// Run until the rule finishes.
    ///
    /// `resume` is invoked once: immediately for non-startup triggers, after
    /// the first action started for startup triggers, and at the latest when
    /// the rule finishes.
    ///
    /// # Returns
    ///
    /// The terminal micro-state.
    pub async fn run<F>(mut self, resume: F, token: CancellationToken) -> MicroState
    where
        F: FnOnce() + Send,
    {
        let span = self.context.span.clone();
        async move {
            let mut resume = Some(resume);
            if self.trigger.kind() != TriggerKind::Startup {
                fire(&mut resume);
            }
            self.context
                .emit(Event::RuleStarted {
                    rule_name: self.context.rule_name.clone(),
                    pid: self.context.process().pid,
                })
                .await;
            tracing::info!("collection rule started");

            let deadline = self
                .context
                .options
                .limits
                .rule_duration_secs
                .map(|secs| Instant::now() + Duration::from_secs(secs));

            self.listen(&mut resume, deadline, &token).await;
            fire(&mut resume);

            let (final_state, reason) = {
                let state = self.state.lock();
                (state.state(), state.description().state_reason)
            };
            tracing::info!(state = %final_state, "collection rule finished");
            self.context
                .emit(Event::RuleFinished {
                    rule_name: self.context.rule_name.clone(),
                    pid: self.context.process().pid,
                    reason,
                })
                .await;
            final_state
        }
        .instrument(span)
        .await
    }

    async fn listen<F>(
        &mut self,
        resume: &mut Option<F>,
        deadline: Option<Instant>,
        token: &CancellationToken,
    ) where
        F: FnOnce() + Send,
    {
        loop {
            let fired = tokio::select! {
                biased;
                _ = token.cancelled() => Err(Interrupt::Cancelled),
                _ = sleep_until(deadline) => Err(Interrupt::DurationReached),
                fired = self.trigger.wait() => Ok(fired),
            };
            match fired {
                Err(interrupt) => {
                    self.interrupted(interrupt).await;
                    return;
                }
                Ok(Err(e)) => {
                    self.transition(StateEvent::RuleFailure(e.to_string())).await;
                    return;
                }
                Ok(Ok(())) => {}
            }
            tracing::debug!("trigger fired");

            let throttled_until = self.state.lock().throttled_until(Instant::now());
            if let Some(until) = throttled_until {
                self.transition(StateEvent::BeginThrottled).await;
                let waited = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Interrupt::Cancelled),
                    _ = sleep_until(deadline) => Err(Interrupt::DurationReached),
                    _ = tokio::time::sleep_until(until) => Ok(()),
                };
                if let Err(interrupt) = waited {
                    self.interrupted(interrupt).await;
                    return;
                }
                self.transition(StateEvent::EndThrottled).await;
                self.trigger.discard_pending();
                continue;
            }

            self.state.lock().record_execution(Instant::now());
            self.transition(StateEvent::BeginActionExecution).await;

            let result = self
                .executor
                .execute_actions(&self.context, || fire(resume), token)
                .await;
            match result {
                Ok(_) => self.transition(StateEvent::ActionExecutionSucceeded).await,
                Err(ActionListError::Cancelled) => {
                    self.interrupted(Interrupt::Cancelled).await;
                    return;
                }
                Err(e) => {
                    self.transition(StateEvent::ActionExecutionFailed(e.to_string()))
                        .await;
                }
            }

            if self.trigger.kind() == TriggerKind::Startup {
                self.transition(StateEvent::StartupTriggerCompleted).await;
                return;
            }
            let limit_reached = self.state.lock().lifetime_limit_reached();
            if limit_reached {
                self.transition(StateEvent::ActionCountReached).await;
                return;
            }
        }
    }

    async fn interrupted(&self, interrupt: Interrupt) {
        let event = match interrupt {
            Interrupt::Cancelled => StateEvent::ConfigurationChanged,
            Interrupt::DurationReached => StateEvent::RuleDurationReached,
        };
        self.transition(event).await;
    }

    async fn transition(&self, event: StateEvent) {
        let changed = {
            let mut state = self.state.lock();
            let before = state.description();
            match state.holder.apply(event) {
                Ok(_) => {
                    let after = state.description();
                    (after != before).then_some(after)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "state transition ignored");
                    None
                }
            }
        };

        if let Some(description) = changed {
            tracing::debug!(
                state = ?description.state,
                reason = %description.state_reason,
                "rule state changed"
            );
            self.context
                .emit(Event::RuleStateChanged {
                    rule_name: self.context.rule_name.clone(),
                    pid: self.context.process().pid,
                    state: description.state,
                    reason: description.state_reason,
                })
                .await;
        }
    }
}

fn fire<F: FnOnce()>(resume: &mut Option<F>) {
    if let Some(resume) = resume.take() {
        resume();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
