//! Shoot resource model.
//!
//! Only the parts of a Shoot the reconcile status machinery reads or
//! writes: identity, generation, labels, annotations and status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of operation recorded in the last operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Reconcile,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Create => write!(f, "Create"),
            OperationType::Reconcile => write!(f, "Reconcile"),
            OperationType::Delete => write!(f, "Delete"),
        }
    }
}

/// State of the last operation.
///
/// `Error` is a retryable failure, `Failed` a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Processing,
    Succeeded,
    Error,
    Failed,
}

impl Phase {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Processing => write!(f, "Processing"),
            Phase::Succeeded => write!(f, "Succeeded"),
            Phase::Error => write!(f, "Error"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// The most recent operation performed on a Shoot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub state: Phase,
    /// Percentage, `0..=100`.
    pub progress: u8,
    pub description: String,
    pub last_update_time: DateTime<Utc>,
}

/// The most recent failure of a Shoot operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl LastError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            last_update_time: None,
        }
    }
}

/// Observed state of a Shoot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default)]
    pub observed_generation: i64,
    /// Start of the current unbroken sequence of failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_cycle_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

/// A managed cluster as stored by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shoot {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Incremented on every change of the desired spec.
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub status: ShootStatus,
}

impl Shoot {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            generation: 1,
            ..Default::default()
        }
    }

    /// `namespace/name`, for logging.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Phase of the last operation, if any.
    pub fn phase(&self) -> Option<Phase> {
        self.status.last_operation.as_ref().map(|op| op.state)
    }

    /// Progress of the last operation, or 0.
    pub fn progress(&self) -> u8 {
        self.status
            .last_operation
            .as_ref()
            .map(|op| op.progress)
            .unwrap_or(0)
    }

    /// Whether the desired spec changed since the last observed attempt.
    pub fn generation_changed(&self) -> bool {
        self.generation != self.status.observed_generation
    }
}
