//! Grouping and filtering of executions for display.
//!
//! [`ExecutionFilterService`] is the seam the filter controller talks to. The
//! default implementation filters by search text, pipeline and status, groups
//! by pipeline name, and renders the criteria as query parameters.

use std::collections::BTreeMap;
use std::sync::Mutex;

use runboard_types::{Execution, ExecutionFilter, ExecutionFilterModel, ExecutionGroup, FilterTag, GroupBy};
use tracing::debug;
use url::form_urlencoded;

/// Heading used when grouping is turned off.
pub const UNGROUPED_HEADING: &str = "All executions";

/// Recomputes derived groups and tags from the current criteria.
pub trait ExecutionFilterService: Send + Sync {
    /// Resets the filter criteria to their defaults.
    fn clear_filters(&self, model: &mut ExecutionFilterModel);

    /// Rebuilds `model.groups` and `model.tags` from `executions` and `model.sort_filter`.
    fn update_execution_groups(&self, model: &mut ExecutionFilterModel, executions: &[Execution]);

    /// Externalizes the current criteria (for example into the page URL).
    fn apply_params_to_url(&self, filter: &ExecutionFilter);
}

/// In-process grouping service used by the CLI and tests.
#[derive(Debug, Default)]
pub struct DefaultExecutionFilterService {
    last_params: Mutex<Option<String>>,
}

impl DefaultExecutionFilterService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The query string produced by the latest [`apply_params_to_url`](ExecutionFilterService::apply_params_to_url).
    pub fn last_params(&self) -> Option<String> {
        self.last_params.lock().expect("params lock poisoned").clone()
    }
}

impl ExecutionFilterService for DefaultExecutionFilterService {
    fn clear_filters(&self, model: &mut ExecutionFilterModel) {
        let current = &model.sort_filter;
        model.sort_filter = ExecutionFilter {
            count: current.count,
            group_by: current.group_by,
            ..ExecutionFilter::default()
        };
    }

    fn update_execution_groups(&self, model: &mut ExecutionFilterModel, executions: &[Execution]) {
        let filter = &model.sort_filter;
        let matcher = SearchMatcher::new(&filter.search);
        let visible: Vec<&Execution> = executions
            .iter()
            .filter(|execution| matches_filter(execution, filter, &matcher))
            .collect();

        model.groups = build_groups(&visible, filter);
        model.tags = build_tags(filter);
        debug!(
            execution_count = executions.len(),
            visible_count = visible.len(),
            group_count = model.groups.len(),
            "recomputed execution groups"
        );
    }

    fn apply_params_to_url(&self, filter: &ExecutionFilter) {
        let params = render_query_params(filter);
        debug!(params = %params, "applied filter params");
        *self.last_params.lock().expect("params lock poisoned") = Some(params);
    }
}

/// Renders filter criteria as a form-urlencoded query string.
pub fn render_query_params(filter: &ExecutionFilter) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer.append_pair("count", &filter.count.to_string());
    let group_by = match filter.group_by {
        GroupBy::Name => "name",
        GroupBy::Ungrouped => "none",
    };
    serializer.append_pair("groupBy", group_by);
    let search = filter.search.trim();
    if !search.is_empty() {
        serializer.append_pair("search", search);
    }
    for pipeline in &filter.pipelines {
        serializer.append_pair("pipeline", pipeline);
    }
    for status in &filter.statuses {
        serializer.append_pair("status", status.as_str());
    }
    serializer.finish()
}

struct SearchMatcher {
    terms: Vec<String>,
}

impl SearchMatcher {
    fn new(search: &str) -> Self {
        Self {
            terms: search.split_whitespace().map(str::to_lowercase).collect(),
        }
    }

    /// Every term must appear in the name, the id, or the trigger type.
    fn matches(&self, execution: &Execution) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        let haystack = format!(
            "{} {} {}",
            execution.name.to_lowercase(),
            execution.id.to_lowercase(),
            execution.trigger_type.as_deref().unwrap_or_default().to_lowercase()
        );
        self.terms.iter().all(|term| haystack.contains(term.as_str()))
    }
}

fn matches_filter(execution: &Execution, filter: &ExecutionFilter, matcher: &SearchMatcher) -> bool {
    if !filter.pipelines.is_empty() && !filter.pipelines.contains(&execution.name) {
        return false;
    }
    if !filter.statuses.is_empty() && !filter.statuses.contains(&execution.status) {
        return false;
    }
    matcher.matches(execution)
}

fn build_groups(visible: &[&Execution], filter: &ExecutionFilter) -> Vec<ExecutionGroup> {
    let mut buckets: BTreeMap<String, Vec<&Execution>> = BTreeMap::new();
    for &execution in visible {
        let heading = match filter.group_by {
            GroupBy::Name => execution.name.clone(),
            GroupBy::Ungrouped => UNGROUPED_HEADING.to_string(),
        };
        buckets.entry(heading).or_default().push(execution);
    }

    let count = filter.count.max(1);
    buckets
        .into_iter()
        .map(|(heading, mut members)| {
            members.sort_by(|left, right| right.start_time.cmp(&left.start_time));
            let running_count = members.iter().filter(|execution| execution.status.is_active()).count();
            let total_count = members.len();
            let config_id = shared_config_id(&members);
            ExecutionGroup {
                heading,
                config_id,
                executions: members.into_iter().take(count).cloned().collect(),
                running_count,
                total_count,
            }
        })
        .collect()
}

fn shared_config_id(members: &[&Execution]) -> Option<String> {
    let first = members.first()?.pipeline_config_id.as_ref()?;
    members
        .iter()
        .all(|execution| execution.pipeline_config_id.as_ref() == Some(first))
        .then(|| first.clone())
}

fn build_tags(filter: &ExecutionFilter) -> Vec<FilterTag> {
    let mut tags = Vec::new();
    let search = filter.search.trim();
    if !search.is_empty() {
        tags.push(tag("search", search));
    }
    tags.extend(filter.pipelines.iter().map(|pipeline| tag("pipeline", pipeline)));
    tags.extend(filter.statuses.iter().map(|status| tag("status", status.as_str())));
    tags
}

fn tag(key: &str, value: &str) -> FilterTag {
    FilterTag {
        key: key.to_string(),
        label: key.to_string(),
        value: value.to_string(),
    }
}
