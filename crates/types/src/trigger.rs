//! Manual trigger commands and the observable state of a trigger in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the manual execution dialog resolves with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerCommand {
    pub pipeline_name: String,
    /// Opaque trigger payload forwarded to the trigger service.
    #[serde(default)]
    pub trigger: Value,
}

impl TriggerCommand {
    pub fn new(pipeline_name: impl Into<String>, trigger: Value) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            trigger,
        }
    }
}

/// Response of the trigger service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerReceipt {
    /// Path-like reference to the created execution, e.g. `/pipelines/01HZX...`.
    #[serde(rename = "ref")]
    pub reference: String,
}

/// An outstanding wait for a freshly triggered execution to appear in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollHandle {
    pub pipeline_name: String,
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
}

/// Busy state of the trigger monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerState {
    /// `true` from the moment a trigger starts until it fails or its poll resolves.
    pub triggering: bool,
    /// Present only while an appearance poll is outstanding.
    pub poll: Option<PollHandle>,
}

/// Read model consumed by the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub loading: bool,
    pub initialization_error: bool,
    pub triggering_execution: bool,
    pub poll: Option<PollHandle>,
}
