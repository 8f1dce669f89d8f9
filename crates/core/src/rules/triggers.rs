//! Collection rule triggers.
//!
//! `Startup` fires once, as soon as the rule starts. `Manual` fires every
//! time the host calls [`ManualTriggerHandle::fire`].

use dm_protocol::rule_models::TriggerOptions;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Trigger type '{0}' is not registered")]
    UnknownTrigger(String),

    #[error("Collection rule '{0}' is not running")]
    UnknownRule(String),

    #[error("Collection rule '{0}' does not use a manual trigger")]
    NotManual(String),

    #[error("The trigger source was closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Startup,
    Manual,
}

impl TriggerKind {
    pub fn parse(options: &TriggerOptions) -> Result<Self, TriggerError> {
        match options.trigger_type.as_str() {
            "Startup" => Ok(TriggerKind::Startup),
            "Manual" => Ok(TriggerKind::Manual),
            other => Err(TriggerError::UnknownTrigger(other.to_string())),
        }
    }
}

/// Host-side handle that fires a manual trigger.
#[derive(Clone)]
pub struct ManualTriggerHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl ManualTriggerHandle {
    pub fn fire(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }
}

/// The trigger a rule pipeline waits on.
pub enum RuleTrigger {
    Startup { fired: bool },
    Manual(watch::Receiver<u64>),
}

impl RuleTrigger {
    /// Build the trigger for `options`. Manual triggers also return the
    /// handle the host fires them with.
    pub fn create(
        options: &TriggerOptions,
    ) -> Result<(Self, Option<ManualTriggerHandle>), TriggerError> {
        match TriggerKind::parse(options)? {
            TriggerKind::Startup => Ok((RuleTrigger::Startup { fired: false }, None)),
            TriggerKind::Manual => {
                let (tx, rx) = watch::channel(0);
                Ok((
                    RuleTrigger::Manual(rx),
                    Some(ManualTriggerHandle { tx: Arc::new(tx) }),
                ))
            }
        }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            RuleTrigger::Startup { .. } => TriggerKind::Startup,
            RuleTrigger::Manual(_) => TriggerKind::Manual,
        }
    }

    /// Wait for the next firing. A startup trigger fires once and then never
    /// again.
    ///
    /// # Errors
    ///
    /// `Closed` when every handle of a manual trigger was dropped.
    pub async fn wait(&mut self) -> Result<(), TriggerError> {
        match self {
            RuleTrigger::Startup { fired } => {
                if *fired {
                    std::future::pending::<()>().await;
                }
                *fired = true;
                Ok(())
            }
            RuleTrigger::Manual(rx) => {
                rx.changed().await.map_err(|_| TriggerError::Closed)?;
                rx.borrow_and_update();
                Ok(())
            }
        }
    }

    /// Forget firings that arrived while the rule was not listening.
    pub fn discard_pending(&mut self) {
        if let RuleTrigger::Manual(rx) = self {
            rx.borrow_and_update();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(
            TriggerKind::parse(&TriggerOptions::new("Startup")),
            Ok(TriggerKind::Startup)
        );
        assert_eq!(
            TriggerKind::parse(&TriggerOptions::new("EventCounter")),
            Err(TriggerError::UnknownTrigger("EventCounter".to_string()))
        );
    }

    #[tokio::test]
    async fn test_manual_trigger_fires_per_call() {
        let (mut trigger, handle) = RuleTrigger::create(&TriggerOptions::new("Manual")).unwrap();
        let handle = handle.unwrap();

        handle.fire();
        tokio::time::timeout(Duration::from_secs(1), trigger.wait())
            .await
            .unwrap()
            .unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), trigger.wait()).await;
        assert!(pending.is_err(), "no second firing was requested");
    }

    #[tokio::test]
    async fn test_discard_pending() {
        let (mut trigger, handle) = RuleTrigger::create(&TriggerOptions::new("Manual")).unwrap();
        let handle = handle.unwrap();

        handle.fire();
        trigger.discard_pending();
        let pending = tokio::time::timeout(Duration::from_millis(50), trigger.wait()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_closed_manual_trigger() {
        let (mut trigger, handle) = RuleTrigger::create(&TriggerOptions::new("Manual")).unwrap();
        drop(handle);
        assert_eq!(trigger.wait().await, Err(TriggerError::Closed));
    }

    #[tokio::test]
    async fn test_startup_fires_once() {
        let (mut trigger, handle) = RuleTrigger::create(&TriggerOptions::new("Startup")).unwrap();
        assert!(handle.is_none());
        trigger.wait().await.unwrap();
        let again = tokio::time::timeout(Duration::from_millis(50), trigger.wait()).await;
        assert!(again.is_err());
    }
}
