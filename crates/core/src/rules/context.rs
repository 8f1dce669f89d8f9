//! Per-rule execution context.

use crate::egress::EgressOperationStore;
use crate::target::TargetProcess;
use dm_protocol::ipc::Event;
use dm_protocol::process_models::ProcessInfo;
use dm_protocol::rule_models::CollectionRuleOptions;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

/// Everything one collection rule needs while it runs: its options, the
/// target process, the host services it calls into, and its log span.
///
/// Read-only once built. Each running rule owns its own context.
pub struct CollectionRuleContext {
    pub rule_name: String,
    pub options: CollectionRuleOptions,
    pub target: Arc<dyn TargetProcess>,
    pub store: EgressOperationStore,
    pub events_tx: Option<Sender<Event>>,
    pub span: tracing::Span,
}

impl CollectionRuleContext {
    pub fn new(
        options: CollectionRuleOptions,
        target: Arc<dyn TargetProcess>,
        store: EgressOperationStore,
    ) -> Self {
        let span = tracing::info_span!(
            "collection_rule",
            rule = %options.name,
            pid = target.info().pid,
        );
        Self {
            rule_name: options.name.clone(),
            options,
            target,
            store,
            events_tx: None,
            span,
        }
    }

    pub fn with_events(mut self, events_tx: Sender<Event>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn process(&self) -> &ProcessInfo {
        self.target.info()
    }

    pub(crate) async fn emit(&self, event: Event) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event).await;
        }
    }
}
