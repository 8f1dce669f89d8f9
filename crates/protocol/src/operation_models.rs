//! Egress operation status models.
//!
//! These are the records the operations API hands back to callers polling an
//! artifact capture that was sent to an egress provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use ts_rs::TS;
use uuid::Uuid;

use crate::process_models::ProcessInfo;

/// Lifecycle state of a tracked egress operation.
///
/// Running -> (Succeeded | Failed | Cancelled), with an optional detour
/// through Stopping when a graceful stop was requested.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
pub enum OperationState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Stopping,
}

impl OperationState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::Cancelled
        )
    }
}

/// Error details recorded on a failed operation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    pub code: String,
    pub message: String,
}

/// Summary of an operation as returned by a listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    #[ts(type = "string")]
    pub operation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: OperationState,
    pub egress_provider_name: Option<String>,
    pub is_stoppable: bool,
    pub process: Option<ProcessInfo>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Full status of a single operation.
///
/// `resource_location` is set once the operation succeeds and points at the
/// egressed artifact; `error` is set once it fails.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    #[ts(type = "string")]
    pub operation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: OperationState,
    pub egress_provider_name: Option<String>,
    pub is_stoppable: bool,
    pub process: Option<ProcessInfo>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub resource_location: Option<String>,
    pub error: Option<OperationError>,
}

impl OperationStatus {
    /// True once the artifact has been egressed and is immutable.
    pub fn is_ready(&self) -> bool {
        self.status == OperationState::Succeeded
    }

    pub fn summary(&self) -> OperationSummary {
        OperationSummary {
            operation_id: self.operation_id,
            created_at: self.created_at,
            status: self.status,
            egress_provider_name: self.egress_provider_name.clone(),
            is_stoppable: self.is_stoppable,
            process: self.process.clone(),
            tags: self.tags.clone(),
        }
    }
}
