//! Action registry.
//!
//! Maps an action type name to a factory that knows the action's options
//! type. The engine only ever sees [`ActionFactory`] trait objects; each
//! [`TypedActionFactory`] closes over its concrete options type and
//! constructor.

use super::base::{ActionError, ActionExecutor, ValidationFailure};
use super::collect::{
    CollectDumpOptions, CollectExceptionsOptions, CollectGcDumpOptions, CollectLiveMetricsOptions,
    CollectLogsOptions, CollectStacksOptions, CollectTraceOptions,
};
use super::environment::{GetEnvironmentVariableOptions, SetEnvironmentVariableOptions};
use super::execute::ExecuteOptions;
use super::profiler::LoadProfilerOptions;
use crate::rules::context::CollectionRuleContext;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Strongly-typed options of one action type.
pub trait ActionSettings: fmt::Debug + Send + Sync {
    /// Check required fields and ranges. An empty list means valid.
    fn validate(&self) -> Vec<ValidationFailure>;

    /// Name of the egress provider this action sends artifacts to, if any.
    fn egress_provider(&self) -> Option<&str> {
        None
    }
}

/// Identifies the action being created within its rule.
#[derive(Clone)]
pub struct ActionInvocation {
    pub context: Arc<CollectionRuleContext>,
    pub action_index: usize,
    pub action_name: Option<String>,
}

/// Creates options and executors for one action type.
pub trait ActionFactory: Send + Sync {
    fn action_type(&self) -> &'static str;

    /// Parse `settings` into this action's options.
    fn create_options(
        &self,
        settings: &serde_json::Value,
    ) -> Result<Box<dyn ActionSettings>, ActionError>;

    /// Parse and validate `settings`, then build the executor.
    fn create(
        &self,
        invocation: ActionInvocation,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn ActionExecutor>, ActionError>;
}

pub struct TypedActionFactory<O, F> {
    action_type: &'static str,
    build: F,
    _options: PhantomData<fn() -> O>,
}

impl<O, F> TypedActionFactory<O, F>
where
    O: DeserializeOwned + ActionSettings + 'static,
    F: Fn(ActionInvocation, O) -> Arc<dyn ActionExecutor> + Send + Sync,
{
    pub fn new(action_type: &'static str, build: F) -> Self {
        Self {
            action_type,
            build,
            _options: PhantomData,
        }
    }

    fn parse(&self, settings: &serde_json::Value) -> Result<O, ActionError> {
        let settings = match settings {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(settings).map_err(|e| ActionError::InvalidOptions {
            action_type: self.action_type.to_string(),
            failures: vec![ValidationFailure::new("settings", e.to_string())],
        })
    }
}

impl<O, F> ActionFactory for TypedActionFactory<O, F>
where
    O: DeserializeOwned + ActionSettings + 'static,
    F: Fn(ActionInvocation, O) -> Arc<dyn ActionExecutor> + Send + Sync,
{
    fn action_type(&self) -> &'static str {
        self.action_type
    }

    fn create_options(
        &self,
        settings: &serde_json::Value,
    ) -> Result<Box<dyn ActionSettings>, ActionError> {
        Ok(Box::new(self.parse(settings)?))
    }

    fn create(
        &self,
        invocation: ActionInvocation,
        settings: &serde_json::Value,
    ) -> Result<Arc<dyn ActionExecutor>, ActionError> {
        let options = self.parse(settings)?;
        let failures = options.validate();
        if !failures.is_empty() {
            return Err(ActionError::InvalidOptions {
                action_type: self.action_type.to_string(),
                failures,
            });
        }
        Ok((self.build)(invocation, options))
    }
}

/// Registered action types by name.
#[derive(Default)]
pub struct ActionRegistry {
    factories: HashMap<&'static str, Arc<dyn ActionFactory>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in action.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TypedActionFactory::new(
            "CollectDump",
            |invocation, options: CollectDumpOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "CollectGCDump",
            |invocation, options: CollectGcDumpOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "CollectTrace",
            |invocation, options: CollectTraceOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "CollectLogs",
            |invocation, options: CollectLogsOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "CollectLiveMetrics",
            |invocation, options: CollectLiveMetricsOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "CollectStacks",
            |invocation, options: CollectStacksOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "CollectExceptions",
            |invocation, options: CollectExceptionsOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "Execute",
            |invocation, options: ExecuteOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "SetEnvironmentVariable",
            |invocation, options: SetEnvironmentVariableOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "GetEnvironmentVariable",
            |invocation, options: GetEnvironmentVariableOptions| options.into_executor(invocation),
        ));
        registry.register(TypedActionFactory::new(
            "LoadProfiler",
            |invocation, options: LoadProfilerOptions| options.into_executor(invocation),
        ));
        registry
    }

    pub fn register(&mut self, factory: impl ActionFactory + 'static) {
        self.factories.insert(factory.action_type(), Arc::new(factory));
    }

    pub fn try_create_factory(&self, action_type: &str) -> Option<Arc<dyn ActionFactory>> {
        self.factories.get(action_type).cloned()
    }

    /// Parse `settings` for `action_type`. `None` if the type is unknown.
    pub fn try_create_options(
        &self,
        action_type: &str,
        settings: &serde_json::Value,
    ) -> Option<Result<Box<dyn ActionSettings>, ActionError>> {
        self.factories
            .get(action_type)
            .map(|factory| factory.create_options(settings))
    }

    /// Parse and validate `settings` for `action_type`.
    ///
    /// # Errors
    ///
    /// `UnknownAction` for an unregistered type, `InvalidOptions` with every
    /// failure otherwise.
    pub fn try_validate_options(
        &self,
        action_type: &str,
        settings: &serde_json::Value,
    ) -> Result<Box<dyn ActionSettings>, ActionError> {
        let options = self
            .try_create_options(action_type, settings)
            .ok_or_else(|| ActionError::UnknownAction(action_type.to_string()))??;
        let failures = options.validate();
        if failures.is_empty() {
            Ok(options)
        } else {
            Err(ActionError::InvalidOptions {
                action_type: action_type.to_string(),
                failures,
            })
        }
    }

    pub fn action_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
