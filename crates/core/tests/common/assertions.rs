//! Assertion helpers over engine events.

use dm_protocol::ipc::Event;
use tokio::sync::mpsc;

/// Drain everything currently buffered in `rx`.
#[allow(dead_code)]
pub fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Indexes of every `ActionStarted` event for `rule_name`, in order.
#[allow(dead_code)]
pub fn started_actions(events: &[Event], rule_name: &str) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ActionStarted {
                rule_name: name,
                action_index,
                ..
            } if name == rule_name => Some(*action_index),
            _ => None,
        })
        .collect()
}

/// The `RuleFinished` reason of `rule_name`, if it finished.
#[allow(dead_code)]
pub fn finished_reason(events: &[Event], rule_name: &str) -> Option<String> {
    events.iter().find_map(|e| match e {
        Event::RuleFinished {
            rule_name: name,
            reason,
            ..
        } if name == rule_name => Some(reason.clone()),
        _ => None,
    })
}

/// Assert `RuleStarted` precedes every action event and `RuleFinished`
/// follows them for `rule_name`.
#[allow(dead_code)]
pub fn assert_rule_event_sequence(events: &[Event], rule_name: &str) {
    let own: Vec<&Event> = events
        .iter()
        .filter(|e| match e {
            Event::RuleStarted { rule_name: n, .. }
            | Event::RuleStateChanged { rule_name: n, .. }
            | Event::ActionStarted { rule_name: n, .. }
            | Event::ActionCompleted { rule_name: n, .. }
            | Event::ActionFailed { rule_name: n, .. }
            | Event::RuleFinished { rule_name: n, .. } => n == rule_name,
            Event::OperationStatusChanged { .. } => false,
        })
        .collect();

    assert!(!own.is_empty(), "no events for rule {rule_name}");
    assert!(
        matches!(own[0], Event::RuleStarted { .. }),
        "first event should be RuleStarted, got: {:?}",
        own[0]
    );
    assert!(
        matches!(own[own.len() - 1], Event::RuleFinished { .. }),
        "last event should be RuleFinished, got: {:?}",
        own[own.len() - 1]
    );
}
