//! Filter criteria and the shared execution filter model.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::execution::{Execution, ExecutionStatus};

/// Per-group display counts offered to the user.
pub const FILTER_COUNT_OPTIONS: [usize; 7] = [1, 2, 5, 10, 25, 50, 100];

/// Display count used until the user picks another one.
pub const DEFAULT_FILTER_COUNT: usize = 2;

/// How visible executions are grouped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// One group per pipeline name.
    #[default]
    Name,
    /// A single flat group.
    #[serde(rename = "none")]
    Ungrouped,
}

/// User-selected criteria that decide which executions are visible and how they are grouped.
///
/// Persisted verbatim in the view-state cache, so every field must survive a serde round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionFilter {
    /// Executions shown per group.
    pub count: usize,
    pub group_by: GroupBy,
    /// Free-text search; empty means no search.
    pub search: String,
    /// Pipeline names to include; empty means all.
    pub pipelines: BTreeSet<String>,
    /// Statuses to include; empty means all.
    pub statuses: BTreeSet<ExecutionStatus>,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            count: DEFAULT_FILTER_COUNT,
            group_by: GroupBy::default(),
            search: String::new(),
            pipelines: BTreeSet::new(),
            statuses: BTreeSet::new(),
        }
    }
}

impl ExecutionFilter {
    /// Returns `true` when no narrowing criterion is set.
    pub fn is_unfiltered(&self) -> bool {
        self.search.trim().is_empty() && self.pipelines.is_empty() && self.statuses.is_empty()
    }
}

/// A heading and the executions shown beneath it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionGroup {
    pub heading: String,
    /// Configuration id shared by the group's executions, when they all have the same one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
    /// Visible executions, newest first, truncated to the filter count.
    pub executions: Vec<Execution>,
    /// Active executions among all matches, before truncation.
    pub running_count: usize,
    /// All matches, before truncation.
    pub total_count: usize,
}

/// Summary chip describing one active criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterTag {
    /// Criterion family (`search`, `pipeline`, `status`).
    pub key: String,
    pub label: String,
    pub value: String,
}

/// Filter criteria plus the derived groups and tags, shared across sessions.
///
/// The host keeps one model for the lifetime of the page and lends it to each
/// session; [`ExecutionFilterModel::begin_session`] prevents groups computed for
/// one application from leaking into another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionFilterModel {
    pub sort_filter: ExecutionFilter,
    pub groups: Vec<ExecutionGroup>,
    pub tags: Vec<FilterTag>,
    pub most_recent_application: Option<String>,
}

impl ExecutionFilterModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares the model for `application`, discarding derived state left by another one.
    ///
    /// Returns `true` when the application changed.
    pub fn begin_session(&mut self, application: &str) -> bool {
        if self.most_recent_application.as_deref() == Some(application) {
            return false;
        }
        self.groups.clear();
        self.tags.clear();
        self.most_recent_application = Some(application.to_string());
        true
    }
}
