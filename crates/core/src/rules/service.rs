//! Collection rule service.
//!
//! The service owns every collection rule running against one target
//! process. It is the host's entry point for starting rules, triggering
//! manual rules, reading their state, and swapping in a new configuration.

use super::actions::ActionRegistry;
use super::context::CollectionRuleContext;
use super::executor::ActionListExecutor;
use super::pipeline::{CollectionRulePipeline, SharedRuleState};
use super::state::MicroState;
use super::triggers::{ManualTriggerHandle, RuleTrigger, TriggerError, TriggerKind};
use super::validation::{validate_rule, RuleValidationError};
use crate::egress::EgressOperationStore;
use crate::target::TargetProcess;
use dm_protocol::config_models::OutcomeTransition;
use dm_protocol::ipc::Event;
use dm_protocol::rule_models::CollectionRuleOptions;
use dm_protocol::rule_state_models::{CollectionRuleDescription, CollectionRuleDetailedDescription};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A rule that was rejected and not started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRule {
    pub name: String,
    pub errors: Vec<RuleValidationError>,
}

struct RunningRule {
    state: SharedRuleState,
    token: CancellationToken,
    trigger: Option<ManualTriggerHandle>,
    handle: Option<JoinHandle<MicroState>>,
}

/// Runs the collection rules of one target process.
///
/// Each rule runs as its own tokio task with a child of the service's
/// shutdown token. The registry entry outlives the task so finished rules
/// can still be described.
pub struct CollectionRuleService {
    registry: Arc<ActionRegistry>,
    executor: Arc<ActionListExecutor>,
    store: EgressOperationStore,
    target: Arc<dyn TargetProcess>,
    policy: OutcomeTransition,
    events_tx: Option<mpsc::Sender<Event>>,
    rules: Mutex<HashMap<String, RunningRule>>,
    shutdown: CancellationToken,
}

impl CollectionRuleService {
    /// Create a service for `target`.
    ///
    /// # Arguments
    ///
    /// * `registry` - Action types available to rules
    /// * `store` - Operation store egress actions register with
    /// * `target` - The process every rule acts on
    pub fn new(
        registry: Arc<ActionRegistry>,
        store: EgressOperationStore,
        target: Arc<dyn TargetProcess>,
    ) -> Self {
        Self {
            executor: Arc::new(ActionListExecutor::new(Arc::clone(&registry))),
            registry,
            store,
            target,
            policy: OutcomeTransition::default(),
            events_tx: None,
            rules: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: OutcomeTransition) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events_tx: mpsc::Sender<Event>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn target(&self) -> &Arc<dyn TargetProcess> {
        &self.target
    }

    /// Validate and start every rule whose filters match the target.
    ///
    /// The target runtime is resumed once every startup rule has started
    /// its first action (or finished without starting one). With no startup
    /// rules it is resumed right away.
    ///
    /// # Returns
    ///
    /// The rules that failed validation. They are not started.
    pub fn start(&self, rules: Vec<CollectionRuleOptions>) -> Vec<InvalidRule> {
        self.launch(rules, true)
    }

    /// Finish every running rule with `FinishedViaConfigChange`, then start
    /// `rules` in their place. The target is not resumed again.
    pub async fn apply_configuration(&self, rules: Vec<CollectionRuleOptions>) -> Vec<InvalidRule> {
        let previous: Vec<(String, RunningRule)> = self.rules.lock().drain().collect();
        for (_, rule) in &previous {
            rule.token.cancel();
        }
        for (name, rule) in previous {
            if let Some(handle) = rule.handle {
                match handle.await {
                    Ok(state) => tracing::debug!(rule = %name, %state, "collection rule stopped"),
                    Err(e) => tracing::warn!(rule = %name, error = %e, "collection rule task failed"),
                }
            }
        }
        tracing::info!(rules = rules.len(), "applying new collection rule configuration");
        self.launch(rules, false)
    }

    fn launch(&self, rules: Vec<CollectionRuleOptions>, resume_target: bool) -> Vec<InvalidRule> {
        let process = self.target.info().clone();
        let mut invalid = Vec::new();
        let mut resumes = Vec::new();
        let mut running = self.rules.lock();

        for options in rules {
            if !options.filters.iter().all(|filter| filter.matches(&process)) {
                tracing::debug!(rule = %options.name, "collection rule does not apply to the target");
                continue;
            }

            let mut errors = validate_rule(&options, &self.registry, self.store.registry())
                .err()
                .unwrap_or_default();
            if running.contains_key(&options.name) {
                errors.push(RuleValidationError::DuplicateRuleName(options.name.clone()));
            }
            let created = RuleTrigger::create(&options.trigger);
            let (trigger, manual) = match created {
                Ok(created) if errors.is_empty() => created,
                _ => {
                    tracing::warn!(
                        rule = %options.name,
                        errors = errors.len(),
                        "collection rule is invalid"
                    );
                    invalid.push(InvalidRule {
                        name: options.name,
                        errors,
                    });
                    continue;
                }
            };

            let resume_tx = if resume_target && trigger.kind() == TriggerKind::Startup {
                let (tx, rx) = oneshot::channel::<()>();
                resumes.push(rx);
                Some(tx)
            } else {
                None
            };

            let name = options.name.clone();
            let mut context =
                CollectionRuleContext::new(options, Arc::clone(&self.target), self.store.clone());
            if let Some(tx) = &self.events_tx {
                context = context.with_events(tx.clone());
            }
            let pipeline = CollectionRulePipeline::new(
                Arc::new(context),
                Arc::clone(&self.executor),
                trigger,
                self.policy,
            );
            let state = pipeline.state();
            let token = self.shutdown.child_token();
            let resume = move || {
                if let Some(tx) = resume_tx {
                    let _ = tx.send(());
                }
            };
            let handle = tokio::spawn(pipeline.run(resume, token.clone()));

            running.insert(
                name,
                RunningRule {
                    state,
                    token,
                    trigger: manual,
                    handle: Some(handle),
                },
            );
        }
        drop(running);

        if resume_target {
            let target = Arc::clone(&self.target);
            tokio::spawn(async move {
                join_all(resumes).await;
                match target.resume_runtime().await {
                    Ok(()) => tracing::info!(pid = target.info().pid, "target runtime resumed"),
                    Err(e) => tracing::warn!(error = %e, "failed to resume the target runtime"),
                }
            });
        }
        invalid
    }

    /// Fire the manual trigger of `rule_name`.
    ///
    /// # Errors
    ///
    /// `UnknownRule` when no such rule was started, `NotManual` when the rule
    /// uses another trigger.
    pub fn trigger(&self, rule_name: &str) -> Result<(), TriggerError> {
        let rules = self.rules.lock();
        let rule = rules
            .get(rule_name)
            .ok_or_else(|| TriggerError::UnknownRule(rule_name.to_string()))?;
        let handle = rule
            .trigger
            .as_ref()
            .ok_or_else(|| TriggerError::NotManual(rule_name.to_string()))?;
        handle.fire();
        Ok(())
    }

    pub fn describe_rules(&self) -> BTreeMap<String, CollectionRuleDescription> {
        self.rules
            .lock()
            .iter()
            .map(|(name, rule)| (name.clone(), rule.state.lock().description()))
            .collect()
    }

    pub fn describe_rule(&self, rule_name: &str) -> Option<CollectionRuleDetailedDescription> {
        self.rules
            .lock()
            .get(rule_name)
            .map(|rule| rule.state.lock().detailed_description())
    }

    /// Wait for every started rule to finish.
    pub async fn join(&self) {
        let handles: Vec<(String, JoinHandle<MicroState>)> = self
            .rules
            .lock()
            .iter_mut()
            .filter_map(|(name, rule)| rule.handle.take().map(|handle| (name.clone(), handle)))
            .collect();
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(rule = %name, error = %e, "collection rule task failed");
            }
        }
    }

    /// Ask every rule to finish without waiting for it.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Finish every rule and wait for them.
    pub async fn shutdown(&self) {
        self.cancel();
        self.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::{EgressProviderRegistry, RequestLimitTracker};
    use crate::target::SimulatedTarget;
    use dm_protocol::config_models::default_operation_limit;
    use dm_protocol::process_models::{ProcessFilter, ProcessFilterKey, ProcessFilterMatchType};
    use dm_protocol::rule_models::{ActionOptions, LimitsOptions, TriggerOptions};
    use dm_protocol::rule_state_models::CollectionRuleState;
    use serde_json::json;
    use std::time::Duration;

    fn create_test_service(target: Arc<SimulatedTarget>) -> CollectionRuleService {
        let store = EgressOperationStore::new(
            Arc::new(EgressProviderRegistry::new()),
            RequestLimitTracker::new(HashMap::new(), default_operation_limit),
        );
        CollectionRuleService::new(Arc::new(ActionRegistry::with_defaults()), store, target)
    }

    fn rule(name: &str, trigger: &str) -> CollectionRuleOptions {
        CollectionRuleOptions {
            name: name.to_string(),
            filters: Vec::new(),
            trigger: TriggerOptions::new(trigger),
            actions: vec![ActionOptions::new(
                "SetEnvironmentVariable",
                json!({ "name": "RULE", "value": name }),
            )],
            limits: LimitsOptions::default(),
        }
    }

    async fn wait_for_resume(target: &SimulatedTarget) {
        for _ in 0..100 {
            if target.resume_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_startup_rules_resume_target_once() {
        let target = Arc::new(SimulatedTarget::with_pid(10, "svc"));
        let service = create_test_service(Arc::clone(&target));

        let invalid = service.start(vec![
            rule("first", "Startup"),
            rule("second", "Startup"),
            rule("manual", "Manual"),
        ]);
        assert!(invalid.is_empty());

        wait_for_resume(&target).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while service.describe_rules()["second"].state != CollectionRuleState::Finished
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(target.resume_count(), 1);
        let rules = service.describe_rules();
        assert_eq!(rules["first"].state, CollectionRuleState::Finished);
        assert_eq!(rules["manual"].state, CollectionRuleState::Running);

        service.shutdown().await;
        assert_eq!(
            service.describe_rules()["manual"].state,
            CollectionRuleState::Finished
        );
    }

    #[tokio::test]
    async fn test_no_startup_rules_resumes_immediately() {
        let target = Arc::new(SimulatedTarget::with_pid(11, "svc"));
        let service = create_test_service(Arc::clone(&target));

        service.start(vec![rule("manual", "Manual")]);
        wait_for_resume(&target).await;
        assert_eq!(target.resume_count(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_trigger_errors() {
        let target = Arc::new(SimulatedTarget::with_pid(12, "svc"));
        let service = create_test_service(target);
        service.start(vec![rule("startup", "Startup"), rule("manual", "Manual")]);

        assert_eq!(
            service.trigger("missing"),
            Err(TriggerError::UnknownRule("missing".to_string()))
        );
        assert_eq!(
            service.trigger("startup"),
            Err(TriggerError::NotManual("startup".to_string()))
        );
        assert_eq!(service.trigger("manual"), Ok(()));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_and_filtered_rules_are_not_started() {
        let target = Arc::new(SimulatedTarget::with_pid(13, "svc"));
        let service = create_test_service(target);

        let mut other_process = rule("other", "Manual");
        other_process.filters.push(ProcessFilter {
            key: ProcessFilterKey::ProcessName,
            value: "another-service".to_string(),
            match_type: ProcessFilterMatchType::Exact,
        });
        let invalid = service.start(vec![
            rule("bad", "Cron"),
            rule("dup", "Manual"),
            rule("dup", "Manual"),
            other_process,
        ]);

        assert_eq!(invalid.len(), 2);
        assert_eq!(invalid[0].name, "bad");
        assert_eq!(
            invalid[1].errors,
            vec![RuleValidationError::DuplicateRuleName("dup".to_string())]
        );
        let names: Vec<String> = service.describe_rules().into_keys().collect();
        assert_eq!(names, vec!["dup".to_string()]);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_apply_configuration_restarts_rules() {
        let target = Arc::new(SimulatedTarget::with_pid(14, "svc"));
        let (tx, mut rx) = mpsc::channel(64);
        let service = create_test_service(Arc::clone(&target)).with_events(tx);

        service.start(vec![rule("manual", "Manual")]);
        let invalid = service
            .apply_configuration(vec![rule("manual", "Manual"), rule("added", "Manual")])
            .await;
        assert!(invalid.is_empty());

        let mut finished_reasons = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::RuleFinished { reason, .. } = event {
                finished_reasons.push(reason);
            }
        }
        assert_eq!(
            finished_reasons,
            vec!["The rule finished because its configuration changed.".to_string()]
        );
        assert_eq!(service.describe_rules().len(), 2);
        assert_eq!(
            service.describe_rules()["manual"].state,
            CollectionRuleState::Running
        );

        service.shutdown().await;
        wait_for_resume(&target).await;
        assert_eq!(target.resume_count(), 1);
    }
}
