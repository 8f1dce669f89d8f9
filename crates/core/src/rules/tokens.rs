//! Settings token substitution.
//!
//! String values inside action settings may embed tokens that are resolved
//! just before the action is created:
//!
//! - `$(Actions.<name>.<OutputKey>)`: an output value of an earlier named action
//! - `$(Process.ProcessId)`, `$(Process.Name)`, `$(Process.RuntimeId)`
//!
//! Tokens that cannot be resolved are left in place.

use dm_protocol::process_models::ProcessInfo;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

const TOKEN_START: &str = "$(";
const TOKEN_END: char = ')';
const ACTIONS_PREFIX: &str = "Actions.";
const PROCESS_PREFIX: &str = "Process.";

/// Output values of completed actions, keyed by action name.
pub type ActionOutputs = HashMap<String, HashMap<String, String>>;

enum Token<'a> {
    ActionOutput { action: &'a str, key: &'a str },
    Process(&'a str),
}

fn parse_token(inner: &str) -> Option<Token<'_>> {
    if let Some(rest) = inner.strip_prefix(ACTIONS_PREFIX) {
        let (action, key) = rest.rsplit_once('.')?;
        if action.is_empty() || key.is_empty() {
            return None;
        }
        return Some(Token::ActionOutput { action, key });
    }
    inner.strip_prefix(PROCESS_PREFIX).map(Token::Process)
}

/// Calls `visit` with the inner text of every `$(...)` token in `text`.
fn for_each_token<'a>(text: &'a str, mut visit: impl FnMut(&'a str)) {
    let mut rest = text;
    while let Some(start) = rest.find(TOKEN_START) {
        let after = &rest[start + TOKEN_START.len()..];
        let Some(end) = after.find(TOKEN_END) else {
            return;
        };
        visit(&after[..end]);
        rest = &after[end + 1..];
    }
}

fn resolve(inner: &str, process: &ProcessInfo, outputs: &ActionOutputs) -> Option<String> {
    match parse_token(inner)? {
        Token::ActionOutput { action, key } => outputs.get(action)?.get(key).cloned(),
        Token::Process("ProcessId") => Some(process.pid.to_string()),
        Token::Process("Name") => Some(process.name.clone()),
        Token::Process("RuntimeId") => Some(process.uid.to_string()),
        Token::Process(_) => None,
    }
}

fn substitute_str(text: &str, process: &ProcessInfo, outputs: &ActionOutputs) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(TOKEN_START) {
        let after = &rest[start + TOKEN_START.len()..];
        let Some(end) = after.find(TOKEN_END) else {
            break;
        };
        result.push_str(&rest[..start]);
        match resolve(&after[..end], process, outputs) {
            Some(value) => result.push_str(&value),
            None => result.push_str(&rest[start..start + TOKEN_START.len() + end + 1]),
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    result
}

/// Replace every resolvable token in the string values of `settings`.
pub fn substitute(settings: &Value, process: &ProcessInfo, outputs: &ActionOutputs) -> Value {
    match settings {
        Value::String(text) if text.contains(TOKEN_START) => {
            Value::String(substitute_str(text, process, outputs))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute(item, process, outputs))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, process, outputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Names of every action whose outputs `settings` references.
pub fn referenced_actions(settings: &Value) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_references(settings, &mut names);
    names
}

fn collect_references(settings: &Value, names: &mut BTreeSet<String>) {
    match settings {
        Value::String(text) => for_each_token(text, |inner| {
            if let Some(Token::ActionOutput { action, .. }) = parse_token(inner) {
                names.insert(action.to_string());
            }
        }),
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, names)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, names)),
        _ => {}
    }
}
