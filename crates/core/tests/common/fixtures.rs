//! Test fixtures for configuration directories, rules and rule contexts.

use dm_core::egress::{EgressOperationStore, EgressProviderRegistry, RequestLimitTracker};
use dm_core::rules::CollectionRuleContext;
use dm_core::target::TargetProcess;
use dm_protocol::config_models::default_operation_limit;
use dm_protocol::process_models::ProcessInfo;
use dm_protocol::rule_models::{ActionOptions, CollectionRuleOptions, LimitsOptions, TriggerOptions};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Create a temporary root with a complete `.diagmon/` directory.
///
/// - `config.toml` with a filesystem provider named `artifacts` that writes
///   to `<root>/out`, and a `dump` limit of 1
/// - `rules/startup-dump.yaml`: startup trigger, one dump to `artifacts`
/// - `rules/manual-env.yaml`: manual trigger, set then read an environment
///   variable, at most two runs
///
/// Returns a TempDir that must be kept alive for the test duration.
#[allow(dead_code)]
pub fn create_test_root() -> std::io::Result<TempDir> {
    let temp_dir = tempfile::tempdir()?;
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join(".diagmon/rules"))?;
    std::fs::create_dir_all(root.join("out"))?;

    let config_toml = format!(
        r#"
[limits]
dump = 1

[egress.filesystem.artifacts]
directory_path = "{}"
"#,
        root.join("out").display()
    );
    std::fs::write(root.join(".diagmon/config.toml"), config_toml)?;

    let startup_dump = r#"
name: startup-dump
trigger:
  type: Startup
actions:
  - name: dump
    type: CollectDump
    settings:
      egress: artifacts
      dump-type: mini
"#;
    std::fs::write(root.join(".diagmon/rules/startup-dump.yaml"), startup_dump)?;

    let manual_env = r#"
name: manual-env
trigger:
  type: Manual
actions:
  - type: SetEnvironmentVariable
    settings:
      name: DIAG_MARKER
      value: "pid-$(Process.ProcessId)"
  - type: GetEnvironmentVariable
    settings:
      name: DIAG_MARKER
limits:
  action-count: 2
"#;
    std::fs::write(root.join(".diagmon/rules/manual-env.yaml"), manual_env)?;

    Ok(temp_dir)
}

#[allow(dead_code)]
pub fn create_test_process(pid: u32) -> ProcessInfo {
    ProcessInfo {
        pid,
        uid: Uuid::new_v4(),
        name: "test-service".to_string(),
        command_line: "/usr/local/bin/test-service".to_string(),
    }
}

/// A store over `registry` with the built-in per-artifact limits.
#[allow(dead_code)]
pub fn create_test_store(registry: Arc<EgressProviderRegistry>) -> EgressOperationStore {
    EgressOperationStore::new(
        registry,
        RequestLimitTracker::new(HashMap::new(), default_operation_limit),
    )
}

#[allow(dead_code)]
pub fn create_test_rule(
    name: &str,
    trigger: &str,
    actions: Vec<ActionOptions>,
) -> CollectionRuleOptions {
    CollectionRuleOptions {
        name: name.to_string(),
        filters: Vec::new(),
        trigger: TriggerOptions::new(trigger),
        actions,
        limits: LimitsOptions::default(),
    }
}

/// A context for running `actions` directly through the executor.
#[allow(dead_code)]
pub fn create_test_context(
    target: Arc<dyn TargetProcess>,
    actions: Vec<ActionOptions>,
) -> Arc<CollectionRuleContext> {
    let store = create_test_store(Arc::new(EgressProviderRegistry::new()));
    Arc::new(CollectionRuleContext::new(
        create_test_rule("test-rule", "Startup", actions),
        target,
        store,
    ))
}

/// `Execute` action running `sh -c "<script>"`.
#[allow(dead_code)]
pub fn shell(script: &str) -> ActionOptions {
    ActionOptions::new(
        "Execute",
        json!({ "path": "sh", "arguments": ["-c", script] }),
    )
}

#[allow(dead_code)]
pub fn set_env(name: &str, value: &str) -> ActionOptions {
    ActionOptions::new(
        "SetEnvironmentVariable",
        json!({ "name": name, "value": value }),
    )
}

#[allow(dead_code)]
pub fn get_env(name: &str) -> ActionOptions {
    ActionOptions::new("GetEnvironmentVariable", json!({ "name": name }))
}
