//! Filter controller: owns the filter criteria of a session and keeps groups,
//! tags and persisted view state in step with them.
//!
//! Criteria change only through [`FilterController::update_filter`] (or the
//! helpers built on it). Each change is compared by value with the previous
//! criteria; a real change is written to the view-state cache under the
//! application name and announced with [`SessionSignal::FilterChanged`].

use std::sync::Arc;

use runboard_types::{
    Application, ExecutionFilter, ExecutionFilterModel, ExecutionGroup, FILTER_COUNT_OPTIONS, FilterTag, SessionSignal,
};
use runboard_util::ViewStateCache;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::{emit_signal, grouping::ExecutionFilterService, normalize::normalize_application};

/// Lifecycle of the executions list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// Waiting for the initial data sets.
    Loading,
    /// Groups reflect the current data and criteria.
    Ready,
    /// Initial loading failed; terminal for the session.
    Failed,
}

/// Whether an update actually changed the criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChange {
    Unchanged,
    Changed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unsupported display count {0}; choose one of 1, 2, 5, 10, 25, 50 or 100")]
    UnsupportedCount(usize),
}

pub struct FilterController {
    application_name: String,
    model: ExecutionFilterModel,
    service: Arc<dyn ExecutionFilterService>,
    cache: Arc<ViewStateCache>,
    phase: FilterPhase,
    load_error: Option<String>,
    signals: Option<UnboundedSender<SessionSignal>>,
}

impl FilterController {
    /// Takes over `model` for `application_name`.
    ///
    /// Groups left by a different application are discarded first; cached
    /// criteria for this application, when present and valid, replace the
    /// model's current criteria.
    pub fn new(
        application_name: &str,
        mut model: ExecutionFilterModel,
        service: Arc<dyn ExecutionFilterService>,
        cache: Arc<ViewStateCache>,
        signals: Option<UnboundedSender<SessionSignal>>,
    ) -> Self {
        if model.begin_session(application_name) {
            debug!(application = %application_name, "discarded groups of previous application");
        }
        if let Some(cached) = cache.get_as::<ExecutionFilter>(application_name) {
            debug!(application = %application_name, "restored filter criteria from view-state cache");
            model.sort_filter = cached;
        }

        Self {
            application_name: application_name.to_string(),
            model,
            service,
            cache,
            phase: FilterPhase::Loading,
            load_error: None,
            signals,
        }
    }

    pub fn phase(&self) -> FilterPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase == FilterPhase::Loading
    }

    pub fn initialization_error(&self) -> bool {
        self.phase == FilterPhase::Failed
    }

    /// Failure detail reported by the data provider, if any.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn filter(&self) -> &ExecutionFilter {
        &self.model.sort_filter
    }

    pub fn groups(&self) -> &[ExecutionGroup] {
        &self.model.groups
    }

    pub fn tags(&self) -> &[FilterTag] {
        &self.model.tags
    }

    pub fn model(&self) -> &ExecutionFilterModel {
        &self.model
    }

    /// Normalizes names, publishes the criteria, recomputes groups and tags, and leaves `Loading`.
    ///
    /// Safe to call repeatedly; ignored once loading has failed.
    pub fn update_execution_groups(&mut self, application: &mut Application) {
        if self.phase == FilterPhase::Failed {
            debug!(application = %self.application_name, "skipping group update after load failure");
            return;
        }

        normalize_application(application);
        self.service.apply_params_to_url(&self.model.sort_filter);
        self.service.update_execution_groups(&mut self.model, &application.executions);

        if self.phase == FilterPhase::Loading {
            info!(
                application = %self.application_name,
                group_count = self.model.groups.len(),
                "executions ready"
            );
        }
        self.phase = FilterPhase::Ready;
        emit_signal(
            &self.signals,
            SessionSignal::GroupsUpdated {
                group_count: self.model.groups.len(),
            },
        );
    }

    /// Resets the criteria to their defaults and regroups.
    ///
    /// While still loading only the criteria are reset; grouping waits for the data.
    pub fn clear_filters(&mut self, application: &mut Application) {
        let previous = self.model.sort_filter.clone();
        self.service.clear_filters(&mut self.model);
        if self.model.sort_filter != previous {
            self.filter_changed();
        }
        if self.phase == FilterPhase::Ready {
            self.update_execution_groups(application);
        }
    }

    /// Applies `mutate` to a copy of the criteria and commits the copy if it differs.
    pub fn update_filter<F>(&mut self, application: &mut Application, mutate: F) -> FilterChange
    where
        F: FnOnce(&mut ExecutionFilter),
    {
        let mut next = self.model.sort_filter.clone();
        mutate(&mut next);
        if next == self.model.sort_filter {
            return FilterChange::Unchanged;
        }

        self.model.sort_filter = next;
        self.filter_changed();
        if self.phase == FilterPhase::Ready {
            self.update_execution_groups(application);
        }
        FilterChange::Changed
    }

    /// Changes the per-group display count; only [`FILTER_COUNT_OPTIONS`] are accepted.
    pub fn set_count(&mut self, application: &mut Application, count: usize) -> Result<FilterChange, FilterError> {
        if !FILTER_COUNT_OPTIONS.contains(&count) {
            return Err(FilterError::UnsupportedCount(count));
        }
        Ok(self.update_filter(application, |filter| filter.count = count))
    }

    /// Moves to the terminal `Failed` phase.
    pub fn mark_load_failed(&mut self, message: Option<String>) {
        warn!(
            application = %self.application_name,
            message = message.as_deref().unwrap_or("unknown error"),
            "executions failed to load"
        );
        self.phase = FilterPhase::Failed;
        self.load_error = message;
        emit_signal(&self.signals, SessionSignal::LoadFailed);
    }

    /// Lightweight refresh: names only, groups untouched.
    pub fn on_executions_reloaded(&mut self, application: &mut Application) {
        normalize_application(application);
    }

    /// Hands the model back to the host.
    pub fn into_model(self) -> ExecutionFilterModel {
        self.model
    }

    fn filter_changed(&mut self) {
        if let Err(error) = self.cache.put_as(&self.application_name, &self.model.sort_filter) {
            warn!(
                application = %self.application_name,
                error = %error,
                "failed to persist filter criteria"
            );
        }
        emit_signal(&self.signals, SessionSignal::FilterChanged);
    }
}
