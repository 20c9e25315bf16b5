//! Execution and pipeline configuration records as delivered by the data provider.
//!
//! Both records keep every upstream field they do not model explicitly in an
//! `attributes` map, so a fixture or API payload survives a round trip through
//! these types untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// Lifecycle status reported for a pipeline execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    NotStarted,
    Running,
    Paused,
    Suspended,
    Succeeded,
    Terminal,
    Canceled,
    Stopped,
    Skipped,
    /// Any status this client does not recognise.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    /// Returns `true` while the execution has not reached a final state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::NotStarted | Self::Running | Self::Paused | Self::Suspended)
    }

    /// Wire label, also used for filter tags and query parameters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Suspended => "SUSPENDED",
            Self::Succeeded => "SUCCEEDED",
            Self::Terminal => "TERMINAL",
            Self::Canceled => "CANCELED",
            Self::Stopped => "STOPPED",
            Self::Skipped => "SKIPPED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a wire label case-insensitively.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_uppercase().replace('-', "_");
        let status = match normalized.as_str() {
            "NOT_STARTED" => Self::NotStarted,
            "RUNNING" => Self::Running,
            "PAUSED" => Self::Paused,
            "SUSPENDED" => Self::Suspended,
            "SUCCEEDED" => Self::Succeeded,
            "TERMINAL" => Self::Terminal,
            "CANCELED" => Self::Canceled,
            "STOPPED" => Self::Stopped,
            "SKIPPED" => Self::Skipped,
            "UNKNOWN" => Self::Unknown,
            _ => return None,
        };
        Some(status)
    }
}

/// A single run instance of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Unique execution identifier.
    pub id: String,
    /// Weak reference to the pipeline configuration this run was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_config_id: Option<String>,
    /// Display name. Rewritten from the matching configuration by the name normalizer.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    /// Start time, carried as epoch milliseconds on the wire.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Trigger kind (`manual`, `cron`, `git`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    /// Remaining upstream fields.
    #[serde(flatten)]
    pub attributes: JsonMap<String, Value>,
}

impl Execution {
    /// Convenience constructor used by hosts and tests.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style setter for the configuration back-reference.
    pub fn with_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.pipeline_config_id = Some(config_id.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

/// The named, reusable definition an execution is instantiated from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub attributes: JsonMap<String, Value>,
}

impl PipelineConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attributes: JsonMap::new(),
        }
    }
}

/// The executions and configurations of one application, plus their readiness flags.
///
/// Created by the host, lent to a session for its lifetime and handed back on teardown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub name: String,
    #[serde(default)]
    pub executions: Vec<Execution>,
    #[serde(default)]
    pub pipeline_configs: Vec<PipelineConfig>,
    #[serde(default)]
    pub executions_loaded: bool,
    #[serde(default)]
    pub pipeline_configs_loading: bool,
}

impl Application {
    /// An application whose data sets have not arrived yet.
    pub fn loading(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executions: Vec::new(),
            pipeline_configs: Vec::new(),
            executions_loaded: false,
            pipeline_configs_loading: true,
        }
    }

    /// An application whose data sets are both already available.
    pub fn loaded(name: impl Into<String>, executions: Vec<Execution>, pipeline_configs: Vec<PipelineConfig>) -> Self {
        Self {
            name: name.into(),
            executions,
            pipeline_configs,
            executions_loaded: true,
            pipeline_configs_loading: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_keeps_unmodelled_fields() {
        let json = r#"{
            "id": "01H",
            "pipelineConfigId": "cfg-1",
            "name": "Deploy",
            "status": "RUNNING",
            "startTime": 1700000000000,
            "buildTime": 1700000000500,
            "stages": []
        }"#;

        let execution: Execution = serde_json::from_str(json).expect("deserialize execution");
        assert_eq!(execution.pipeline_config_id.as_deref(), Some("cfg-1"));
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.start_time.map(|time| time.timestamp_millis()), Some(1_700_000_000_000));
        assert!(execution.attributes.contains_key("buildTime"));
        assert!(execution.attributes.contains_key("stages"));

        let back = serde_json::to_value(&execution).expect("serialize execution");
        assert_eq!(back["buildTime"], serde_json::json!(1_700_000_000_500_i64));
        assert_eq!(back["pipelineConfigId"], "cfg-1");
    }

    #[test]
    fn unrecognised_status_maps_to_unknown() {
        let execution: Execution = serde_json::from_str(r#"{"id": "x", "status": "BUFFERED"}"#).expect("deserialize");
        assert_eq!(execution.status, ExecutionStatus::Unknown);
        assert!(!execution.status.is_active());
    }

    #[test]
    fn status_parse_accepts_lowercase_and_dashes() {
        assert_eq!(ExecutionStatus::parse("not-started"), Some(ExecutionStatus::NotStarted));
        assert_eq!(ExecutionStatus::parse("terminal"), Some(ExecutionStatus::Terminal));
        assert_eq!(ExecutionStatus::parse("bogus"), None);
    }

    #[test]
    fn application_defaults_from_partial_payload() {
        let application: Application = serde_json::from_str(r#"{"name": "deck"}"#).expect("deserialize application");
        assert!(application.executions.is_empty());
        assert!(!application.executions_loaded);
        assert!(!application.pipeline_configs_loading);
    }
}
