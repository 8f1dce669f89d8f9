//! Terminal rendering of rule events.

use colored::Colorize;
use dm_core::rules::InvalidRule;
use dm_protocol::ipc::Event;
use dm_protocol::rule_state_models::CollectionRuleDescription;
use std::collections::BTreeMap;

pub fn print_event(event: &Event) {
    match event {
        Event::RuleStarted { rule_name, pid } => {
            println!("{} {} started (pid {pid})", "rule".cyan(), rule_name.bold());
        }
        Event::RuleStateChanged {
            rule_name,
            state,
            reason,
            ..
        } => {
            println!(
                "{} {} {:?}: {}",
                "rule".cyan(),
                rule_name.bold(),
                state,
                reason.dimmed()
            );
        }
        Event::ActionStarted {
            rule_name,
            action_index,
            action_type,
            ..
        } => {
            println!("  {} {rule_name}[{action_index}] {action_type}", "▶".blue());
        }
        Event::ActionCompleted {
            rule_name,
            action_index,
            output_values,
            ..
        } => {
            println!("  {} {rule_name}[{action_index}]", "✓".green());
            for (key, value) in output_values {
                println!("      {} = {value}", key.dimmed());
            }
        }
        Event::ActionFailed {
            rule_name,
            action_index,
            error,
            ..
        } => {
            println!("  {} {rule_name}[{action_index}] {}", "✗".red(), error.red());
        }
        Event::RuleFinished {
            rule_name, reason, ..
        } => {
            println!(
                "{} {} finished: {}",
                "rule".cyan(),
                rule_name.bold(),
                reason
            );
        }
        Event::OperationStatusChanged {
            operation_id,
            status,
        } => {
            println!("  {} {operation_id} {status:?}", "egress".magenta());
        }
    }
}

pub fn print_invalid(rule: &InvalidRule) {
    eprintln!("{} {} was not started", "invalid".red().bold(), rule.name.bold());
    for error in &rule.errors {
        eprintln!("    {error}");
    }
}

pub fn print_rules(rules: &BTreeMap<String, CollectionRuleDescription>) {
    println!();
    for (name, description) in rules {
        println!(
            "{:<24} {:<18} {}",
            name.bold(),
            format!("{:?}", description.state),
            description.state_reason.dimmed()
        );
    }
}
