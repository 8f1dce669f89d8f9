use dm_protocol::*;
use std::collections::BTreeSet;
use uuid::Uuid;

#[test]
fn test_rule_deserialization_from_yaml() {
    let yaml_str = r#"
name: startup-dump
filters:
  - key: ProcessName
    value: OrderService
trigger:
  type: Startup
actions:
  - name: dump
    type: CollectDump
    settings:
      egress: artifacts
      dump-type: mini
  - type: Execute
    wait-for-completion: false
    settings:
      path: /bin/echo
      arguments: ["$(Actions.dump.EgressPath)"]
limits:
  action-count: 1
  rule-duration-secs: 60
"#;

    let rule: CollectionRuleOptions =
        serde_yaml::from_str(yaml_str).expect("Failed to deserialize CollectionRuleOptions");

    assert_eq!(rule.name, "startup-dump");
    assert_eq!(rule.filters.len(), 1);
    assert_eq!(rule.filters[0].key, ProcessFilterKey::ProcessName);
    assert_eq!(rule.filters[0].match_type, ProcessFilterMatchType::Exact);
    assert_eq!(rule.trigger.trigger_type, "Startup");
    assert_eq!(rule.actions.len(), 2);
    assert_eq!(rule.actions[0].name.as_deref(), Some("dump"));
    assert!(rule.actions[0].wait_for_completion);
    assert!(!rule.actions[1].wait_for_completion);
    assert_eq!(rule.actions[0].settings["dump-type"], "mini");
    assert_eq!(rule.limits.action_count, Some(1));
    assert_eq!(rule.limits.rule_duration_secs, Some(60));
    assert_eq!(rule.limits.action_count_sliding_window_duration_secs, None);
}

#[test]
fn test_rule_without_actions_or_limits() {
    let yaml_str = r#"
name: manual
trigger:
  type: Manual
"#;

    let rule: CollectionRuleOptions = serde_yaml::from_str(yaml_str).expect("should parse");
    assert!(rule.actions.is_empty());
    assert_eq!(rule.limits, LimitsOptions::default());
    assert!(rule.trigger.settings.is_null());
}

#[test]
fn test_global_config_from_toml() {
    let toml_str = r#"
[limits]
dump = 2

[egress.filesystem.artifacts]
directory_path = "/tmp/artifacts"
intermediate_directory_path = "/tmp/staging"

[egress.s3_storage.bucket]
bucket_name = "diagnostics"
generate_presigned_url = true

[egress.extension.custom]
command = "my-egress"
args = ["--verbose"]

[rules]
outcome_transition = "retain_outcome"
"#;

    let config: GlobalConfig = toml::from_str(toml_str).expect("Failed to parse GlobalConfig");

    assert_eq!(config.operation_limit("dump"), 2);
    assert_eq!(config.operation_limit("gcdump"), 1);
    assert_eq!(config.egress.filesystem.len(), 1);
    assert!(config.egress.filesystem["artifacts"]
        .intermediate_directory_path
        .is_some());
    let s3 = &config.egress.s3_storage["bucket"];
    assert!(s3.generate_presigned_url);
    assert_eq!(s3.presigned_url_expiry_secs(), 3600);
    assert_eq!(config.egress.extension["custom"].args, vec!["--verbose"]);
    assert_eq!(
        config.rules.outcome_transition,
        OutcomeTransition::RetainOutcome
    );
    assert_eq!(config.egress.provider_names().len(), 3);
}

#[test]
fn test_event_serialization() {
    let operation_id = Uuid::new_v4();
    let event = Event::OperationStatusChanged {
        operation_id,
        status: OperationState::Succeeded,
    };

    let json = serde_json::to_value(&event).expect("Failed to serialize Event");
    assert_eq!(json["type"], "operationStatusChanged");
    assert_eq!(json["payload"]["status"], "Succeeded");
    assert_eq!(json["payload"]["operation_id"], operation_id.to_string());

    let deserialized: Event = serde_json::from_value(json).expect("Failed to deserialize Event");
    assert!(matches!(
        deserialized,
        Event::OperationStatusChanged { status: OperationState::Succeeded, .. }
    ));
}

#[test]
fn test_operation_status_serialization() {
    let mut tags = BTreeSet::new();
    tags.insert("incident-42".to_string());

    let status = OperationStatus {
        operation_id: Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        status: OperationState::Failed,
        egress_provider_name: Some("artifacts".to_string()),
        is_stoppable: false,
        process: Some(ProcessInfo {
            pid: 10,
            uid: Uuid::new_v4(),
            name: "svc".to_string(),
            command_line: String::new(),
        }),
        tags,
        resource_location: None,
        error: Some(OperationError {
            code: "EgressFailed".to_string(),
            message: "disk full".to_string(),
        }),
    };

    let json = serde_json::to_value(&status).expect("Failed to serialize OperationStatus");
    assert_eq!(json["status"], "Failed");
    assert_eq!(json["egressProviderName"], "artifacts");
    assert_eq!(json["error"]["code"], "EgressFailed");
    assert!(!status.is_ready());
    assert_eq!(status.summary().tags.len(), 1);
}
