//! Target process identity models.
//!
//! This module defines how a target process is identified when filtering
//! operations and when deciding which collection rules apply to it.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Identity of a target process the monitor is attached to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// Operating system process id.
    pub pid: u32,

    /// Runtime instance identifier, unique across pid reuse.
    #[ts(type = "string")]
    pub uid: Uuid,

    /// Process name (usually the executable name without extension).
    pub name: String,

    /// Full command line used to launch the process.
    #[serde(default)]
    pub command_line: String,
}

/// Partial process identity used to filter operations.
///
/// Unset fields match any process.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct ProcessKey {
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub uid: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ProcessKey {
    pub fn from_pid(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            ..Default::default()
        }
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Returns true when every set field equals the corresponding process field.
    pub fn matches(&self, process: &ProcessInfo) -> bool {
        self.pid.map_or(true, |pid| pid == process.pid)
            && self.uid.map_or(true, |uid| uid == process.uid)
            && self
                .name
                .as_deref()
                .map_or(true, |name| name == process.name)
    }
}

/// Which process property a [`ProcessFilter`] compares against.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
pub enum ProcessFilterKey {
    ProcessId,
    ProcessName,
    CommandLine,
}

/// How a [`ProcessFilter`] compares its value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, TS)]
pub enum ProcessFilterMatchType {
    #[default]
    Exact,
    Contains,
}

/// A single process filter attached to a collection rule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessFilter {
    pub key: ProcessFilterKey,
    pub value: String,
    #[serde(default)]
    pub match_type: ProcessFilterMatchType,
}

impl ProcessFilter {
    /// Name and command line comparisons are case-insensitive.
    pub fn matches(&self, process: &ProcessInfo) -> bool {
        let candidate = match self.key {
            ProcessFilterKey::ProcessId => process.pid.to_string(),
            ProcessFilterKey::ProcessName => process.name.to_lowercase(),
            ProcessFilterKey::CommandLine => process.command_line.to_lowercase(),
        };
        let expected = match self.key {
            ProcessFilterKey::ProcessId => self.value.trim().to_string(),
            _ => self.value.to_lowercase(),
        };

        match self.match_type {
            ProcessFilterMatchType::Exact => candidate == expected,
            ProcessFilterMatchType::Contains => candidate.contains(&expected),
        }
    }
}
