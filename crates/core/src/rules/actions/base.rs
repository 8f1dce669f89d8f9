//! Base collection rule action and supporting types.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// One failed check on an action's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub field: String,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by a single collection rule action.
///
/// `Clone` because a resolved outcome is handed to every caller of
/// [`CollectionRuleAction::wait_for_completion`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The action's options failed validation. A configuration problem, not
    /// a runtime failure.
    #[error("Invalid options for action '{action_type}': {}", join_failures(.failures))]
    InvalidOptions {
        action_type: String,
        failures: Vec<ValidationFailure>,
    },

    #[error("Action type '{0}' is not registered")]
    UnknownAction(String),

    /// The action ran and failed.
    #[error("{0}")]
    Execution(String),

    #[error("The action was cancelled")]
    Cancelled,

    /// The action was driven out of order (started twice, awaited before start).
    #[error("Invalid action state: {0}")]
    InvalidState(String),
}

/// Output of one completed action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionRuleActionResult {
    pub output_values: HashMap<String, String>,
}

impl CollectionRuleActionResult {
    pub fn with_output(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut output_values = HashMap::new();
        output_values.insert(key.into(), value.into());
        Self { output_values }
    }
}

/// One-shot signal an action fires once its work is under way.
///
/// Firing more than once is harmless.
#[derive(Clone)]
pub struct ActionStartedSignal {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ActionStartedSignal {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    pub fn signal(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// The work an action performs once started.
///
/// Implementations call `started.signal()` as soon as the work has begun
/// (a process was launched, an operation was admitted). Returning also
/// counts as started.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        started: ActionStartedSignal,
        token: CancellationToken,
    ) -> Result<CollectionRuleActionResult, ActionError>;
}

/// Lifecycle of a [`CollectionRuleAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Created,
    Started,
    Succeeded,
    Faulted,
    Canceled,
    Disposed,
}

type ActionOutcome = Result<CollectionRuleActionResult, ActionError>;

/// Drives one [`ActionExecutor`] through
/// `Created -> Started -> (Succeeded | Faulted | Canceled) -> Disposed`.
pub struct CollectionRuleAction {
    executor: Option<Arc<dyn ActionExecutor>>,
    state: ActionState,
    token: CancellationToken,
    completion: Option<Shared<BoxFuture<'static, ActionOutcome>>>,
}

impl CollectionRuleAction {
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            executor: Some(executor),
            state: ActionState::Created,
            token: CancellationToken::new(),
            completion: None,
        }
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    /// Start the action and return once it signalled that it started, or
    /// once it finished, whichever comes first.
    ///
    /// # Errors
    ///
    /// `InvalidState` when called a second time; the state of the first run
    /// is left as it was. If the action finished before signalling, its
    /// failure is returned here.
    pub async fn start(&mut self, token: &CancellationToken) -> Result<(), ActionError> {
        let Some(executor) = self.executor.take() else {
            return Err(ActionError::InvalidState(
                "the action was already started".to_string(),
            ));
        };

        self.token = token.child_token();
        let (started, started_rx) = ActionStartedSignal::new();
        let task_token = self.token.clone();
        // The executor observes the token itself and unwinds, so cleanup it
        // owns (egress operations, child processes) has run once this resolves.
        let handle = tokio::spawn(async move {
            match executor.execute(started, task_token.clone()).await {
                Err(_) if task_token.is_cancelled() => Err(ActionError::Cancelled),
                outcome => outcome,
            }
        });

        let completion = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(ActionError::Cancelled),
                Err(e) => Err(ActionError::Execution(format!("action task failed: {e}"))),
            }
        }
        .boxed()
        .shared();
        self.completion = Some(completion.clone());
        self.state = ActionState::Started;

        let signalled = tokio::select! {
            signalled = started_rx => signalled.is_ok(),
            _ = completion.clone() => false,
        };
        if signalled {
            return Ok(());
        }

        let outcome = completion.await;
        self.record(&outcome);
        outcome.map(|_| ())
    }

    /// Wait for the action to finish. Every call returns the same outcome.
    pub async fn wait_for_completion(&mut self) -> ActionOutcome {
        let Some(completion) = self.completion.clone() else {
            return Err(ActionError::InvalidState(
                "the action has not been started".to_string(),
            ));
        };
        let outcome = completion.await;
        self.record(&outcome);
        outcome
    }

    /// Cancel in-flight work and wait for it to unwind. Errors from the
    /// unwinding work are discarded.
    pub async fn dispose(mut self) {
        if let Some(completion) = self.completion.take() {
            if self.state == ActionState::Started {
                self.token.cancel();
            }
            let _ = completion.await;
        }
        self.state = ActionState::Disposed;
    }

    fn record(&mut self, outcome: &ActionOutcome) {
        if self.state != ActionState::Started {
            return;
        }
        self.state = match outcome {
            Ok(_) => ActionState::Succeeded,
            Err(ActionError::Cancelled) => ActionState::Canceled,
            Err(_) => ActionState::Faulted,
        };
    }
}

impl Drop for CollectionRuleAction {
    fn drop(&mut self) {
        if self.state == ActionState::Started {
            self.token.cancel();
        }
    }
}
