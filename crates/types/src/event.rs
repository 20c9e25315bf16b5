//! Notifications flowing into and out of an executions session.

use serde::{Deserialize, Serialize};

use crate::execution::{Execution, PipelineConfig};

/// Notifications emitted by the data provider and the navigation layer.
///
/// Each data-bearing variant carries the fresh data set, so the session applies
/// the change and reacts to it in a single step. Delivering the same
/// notification twice is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ApplicationEvent {
    /// The initial execution list arrived.
    ExecutionsLoaded { executions: Vec<Execution> },
    /// The pipeline configurations arrived.
    #[serde(rename = "pipelineConfigs-loaded")]
    PipelineConfigsLoaded { configs: Vec<PipelineConfig> },
    /// The execution source reported a failure while loading.
    ExecutionsLoadFailure {
        #[serde(default)]
        message: Option<String>,
    },
    /// A lightweight refresh of the execution list.
    ExecutionsReloaded { executions: Vec<Execution> },
    /// Navigation selected (or cleared) an execution in the detail pane.
    NavigationChanged {
        #[serde(default)]
        execution_id: Option<String>,
    },
}

impl ApplicationEvent {
    /// Stable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutionsLoaded { .. } => "executions-loaded",
            Self::PipelineConfigsLoaded { .. } => "pipelineConfigs-loaded",
            Self::ExecutionsLoadFailure { .. } => "executions-load-failure",
            Self::ExecutionsReloaded { .. } => "executions-reloaded",
            Self::NavigationChanged { .. } => "navigation-changed",
        }
    }
}

/// Notifications a session emits for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// The filter criteria changed and were persisted.
    FilterChanged,
    /// Groups and tags were recomputed.
    GroupsUpdated { group_count: usize },
    /// Initial loading failed; the list shows an error instead.
    LoadFailed,
    /// Expand (`true`) or collapse (`false`) every execution group.
    ToggleExpansion(bool),
    /// The trigger busy flag changed.
    TriggeringChanged(bool),
}
