//! One executions view for one application.
//!
//! An [`ExecutionsSession`] owns the [`Application`] handed over by the host,
//! the shared [`ExecutionFilterModel`], the load gate, the filter controller and
//! the trigger monitor. The host feeds it [`ApplicationEvent`]s, either one at a
//! time through [`ExecutionsSession::handle_event`] or through the
//! [`ExecutionsSession::run`] loop, and takes both values back on teardown.

use std::sync::Arc;

use async_trait::async_trait;
use runboard_types::{
    Application, ApplicationEvent, ExecutionFilter, ExecutionFilterModel, ExecutionGroup, FILTER_COUNT_OPTIONS, FilterTag,
    SessionSignal, TriggerCommand, ViewState,
};
use runboard_util::{ViewStateCacheError, ViewStateCacheRegistry};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::emit_signal;
use crate::filter::{FilterChange, FilterController, FilterError, FilterPhase};
use crate::grouping::ExecutionFilterService;
use crate::load::{LoadGate, LoadProgress};
use crate::trigger::{ExecutionAppearancePoller, PipelineTriggerService, TriggerFuture, TriggerMonitor};

/// Modal host that asks the user which pipeline to run and with what trigger.
#[async_trait]
pub trait ManualExecutionPrompt: Send + Sync {
    /// `None` when the user dismissed the dialog.
    async fn request_trigger(&self, application: &Application) -> Option<TriggerCommand>;
}

/// Collaborators a session needs from its host.
#[derive(Clone)]
pub struct SessionServices {
    pub filter_service: Arc<dyn ExecutionFilterService>,
    pub trigger_service: Arc<dyn PipelineTriggerService>,
    pub poller: Arc<dyn ExecutionAppearancePoller>,
    pub prompt: Arc<dyn ManualExecutionPrompt>,
    pub caches: Arc<ViewStateCacheRegistry>,
    pub signals: Option<UnboundedSender<SessionSignal>>,
}

/// Why [`ExecutionsSession::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    Closed,
}

pub struct ExecutionsSession {
    application: Application,
    gate: LoadGate,
    filter: FilterController,
    trigger: TriggerMonitor,
    prompt: Arc<dyn ManualExecutionPrompt>,
    details_target: Option<String>,
    shutdown: CancellationToken,
    signals: Option<UnboundedSender<SessionSignal>>,
}

impl ExecutionsSession {
    /// Wires a session for `application`.
    ///
    /// Groups left in `model` by another application are discarded, cached
    /// criteria are restored, and when both data sets are already loaded the
    /// groups are computed before this returns.
    pub fn new(
        mut application: Application,
        model: ExecutionFilterModel,
        services: SessionServices,
        config: &SessionConfig,
    ) -> Result<Self, ViewStateCacheError> {
        let cache = services.caches.cache(&config.cache_namespace, config.cache_options())?;
        let mut filter = FilterController::new(
            &application.name,
            model,
            Arc::clone(&services.filter_service),
            cache,
            services.signals.clone(),
        );
        let trigger = TriggerMonitor::new(
            &application.name,
            services.trigger_service,
            services.poller,
            services.signals.clone(),
        );

        let shutdown = CancellationToken::new();
        let mut gate = LoadGate::new(&application, shutdown.child_token());
        if gate.poll_ready() == LoadProgress::Ready {
            debug!(application = %application.name, "data already loaded");
            filter.update_execution_groups(&mut application);
        }

        Ok(Self {
            application,
            gate,
            filter,
            trigger,
            prompt: services.prompt,
            details_target: None,
            shutdown,
            signals: services.signals,
        })
    }

    /// Applies one notification from the data provider or the navigation layer.
    pub fn handle_event(&mut self, event: ApplicationEvent) {
        if self.shutdown.is_cancelled() {
            debug!(application = %self.application.name, event = event.kind(), "ignoring event after shutdown");
            return;
        }
        debug!(application = %self.application.name, event = event.kind(), "handling event");

        let progress = self.gate.observe(&event);
        match event {
            ApplicationEvent::ExecutionsLoaded { executions } => {
                self.application.executions = executions;
                self.application.executions_loaded = true;
                self.on_data_applied(progress);
            }
            ApplicationEvent::PipelineConfigsLoaded { configs } => {
                self.application.pipeline_configs = configs;
                self.application.pipeline_configs_loading = false;
                self.on_data_applied(progress);
            }
            ApplicationEvent::ExecutionsLoadFailure { message } => {
                self.gate.disarm();
                self.filter.mark_load_failed(message);
            }
            ApplicationEvent::ExecutionsReloaded { executions } => {
                self.application.executions = executions;
                self.filter.on_executions_reloaded(&mut self.application);
            }
            ApplicationEvent::NavigationChanged { execution_id } => {
                self.details_target = execution_id;
            }
        }
    }

    fn on_data_applied(&mut self, progress: LoadProgress) {
        match progress {
            LoadProgress::Ready => self.filter.update_execution_groups(&mut self.application),
            // Late data after the initial render only refreshes names.
            LoadProgress::Inactive if self.gate.has_fired() => self.filter.on_executions_reloaded(&mut self.application),
            LoadProgress::Pending | LoadProgress::Inactive => {}
        }
    }

    /// Consumes `events` until the session is shut down or the channel closes.
    pub async fn run(&mut self, events: &mut UnboundedReceiver<ApplicationEvent>) -> RunExit {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(application = %self.application.name, "session shut down");
                    return RunExit::Shutdown;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!(application = %self.application.name, "event channel closed");
                        return RunExit::Closed;
                    }
                },
            }
        }
    }

    /// Token that stops [`run`](Self::run) and disarms the load gate when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn application(&self) -> &Application {
        &self.application
    }

    pub fn view_state(&self) -> ViewState {
        let trigger = self.trigger.state();
        ViewState {
            loading: self.filter.is_loading(),
            initialization_error: self.filter.initialization_error(),
            triggering_execution: trigger.triggering,
            poll: trigger.poll,
        }
    }

    pub fn filter(&self) -> &ExecutionFilter {
        self.filter.filter()
    }

    pub fn groups(&self) -> &[ExecutionGroup] {
        self.filter.groups()
    }

    pub fn tags(&self) -> &[FilterTag] {
        self.filter.tags()
    }

    pub fn phase(&self) -> FilterPhase {
        self.filter.phase()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.filter.load_error()
    }

    /// Execution currently shown in the detail pane.
    pub fn details_target(&self) -> Option<&str> {
        self.details_target.as_deref()
    }

    pub fn filter_count_options(&self) -> &'static [usize] {
        &FILTER_COUNT_OPTIONS
    }

    pub fn update_execution_groups(&mut self) {
        self.filter.update_execution_groups(&mut self.application);
    }

    pub fn clear_filters(&mut self) {
        self.filter.clear_filters(&mut self.application);
    }

    pub fn update_filter<F>(&mut self, mutate: F) -> FilterChange
    where
        F: FnOnce(&mut ExecutionFilter),
    {
        self.filter.update_filter(&mut self.application, mutate)
    }

    pub fn set_count(&mut self, count: usize) -> Result<FilterChange, FilterError> {
        self.filter.set_count(&mut self.application, count)
    }

    /// Asks the presentation layer to expand or collapse every group.
    pub fn toggle_expansion(&self, expand: bool) {
        emit_signal(&self.signals, SessionSignal::ToggleExpansion(expand));
    }

    /// Starts `command` without going through the prompt.
    pub fn start_pipeline(&self, command: TriggerCommand) -> TriggerFuture {
        info!(application = %self.application.name, pipeline = %command.pipeline_name, "starting pipeline");
        self.trigger.trigger(command)
    }

    /// Prompts for a trigger and starts it; `None` when the prompt was dismissed.
    pub async fn trigger_pipeline(&self) -> Option<TriggerFuture> {
        let Some(command) = self.prompt.request_trigger(&self.application).await else {
            debug!(application = %self.application.name, "manual execution dismissed");
            return None;
        };
        Some(self.start_pipeline(command))
    }

    /// Stops the session and hands the application and the filter model back.
    pub fn teardown(mut self) -> (Application, ExecutionFilterModel) {
        self.gate.disarm();
        self.shutdown.cancel();
        debug!(application = %self.application.name, "session torn down");
        (self.application, self.filter.into_model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::DefaultExecutionFilterService;
    use anyhow::anyhow;
    use runboard_types::{Execution, ExecutionStatus, GroupBy, PipelineConfig, TriggerReceipt};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;

    struct AcceptingTrigger;

    #[async_trait]
    impl PipelineTriggerService for AcceptingTrigger {
        async fn trigger_pipeline(&self, _application: &str, _pipeline_name: &str, _trigger: &Value) -> anyhow::Result<TriggerReceipt> {
            Ok(TriggerReceipt {
                reference: "/pipelines/new-run".into(),
            })
        }
    }

    struct ImmediatePoller {
        appear: bool,
    }

    #[async_trait]
    impl ExecutionAppearancePoller for ImmediatePoller {
        async fn wait_until_new_triggered_pipeline_appears(
            &self,
            _application: &str,
            _pipeline_name: &str,
            _execution_id: &str,
        ) -> anyhow::Result<()> {
            if self.appear { Ok(()) } else { Err(anyhow!("not listed yet")) }
        }
    }

    struct ScriptedPrompt {
        command: Mutex<Option<TriggerCommand>>,
    }

    #[async_trait]
    impl ManualExecutionPrompt for ScriptedPrompt {
        async fn request_trigger(&self, _application: &Application) -> Option<TriggerCommand> {
            self.command.lock().unwrap().take()
        }
    }

    fn services(
        caches: Arc<ViewStateCacheRegistry>,
        command: Option<TriggerCommand>,
        signals: Option<UnboundedSender<SessionSignal>>,
    ) -> SessionServices {
        SessionServices {
            filter_service: Arc::new(DefaultExecutionFilterService::new()),
            trigger_service: Arc::new(AcceptingTrigger),
            poller: Arc::new(ImmediatePoller { appear: true }),
            prompt: Arc::new(ScriptedPrompt {
                command: Mutex::new(command),
            }),
            caches,
            signals,
        }
    }

    fn executions() -> Vec<Execution> {
        vec![
            Execution::new("e1", "stale").with_config_id("cfg-deploy").with_status(ExecutionStatus::Running),
            Execution::new("e2", "Bake").with_config_id("cfg-bake"),
        ]
    }

    fn configs() -> Vec<PipelineConfig> {
        vec![PipelineConfig::new("cfg-deploy", "Deploy"), PipelineConfig::new("cfg-bake", "Bake")]
    }

    fn loading_session(caches: Arc<ViewStateCacheRegistry>) -> ExecutionsSession {
        ExecutionsSession::new(
            Application::loading("deck"),
            ExecutionFilterModel::new(),
            services(caches, None, None),
            &SessionConfig::default(),
        )
        .expect("session")
    }

    fn headings(session: &ExecutionsSession) -> Vec<String> {
        session.groups().iter().map(|group| group.heading.clone()).collect()
    }

    #[test]
    fn groups_once_both_data_sets_arrive_in_either_order() {
        let orders = [
            [
                ApplicationEvent::ExecutionsLoaded { executions: executions() },
                ApplicationEvent::PipelineConfigsLoaded { configs: configs() },
            ],
            [
                ApplicationEvent::PipelineConfigsLoaded { configs: configs() },
                ApplicationEvent::ExecutionsLoaded { executions: executions() },
            ],
        ];
        for [first, second] in orders {
            let mut session = loading_session(Arc::new(ViewStateCacheRegistry::ephemeral()));
            assert!(session.view_state().loading);

            session.handle_event(first);
            assert!(session.view_state().loading);
            assert!(session.groups().is_empty());

            session.handle_event(second);
            assert!(!session.view_state().loading);
            assert_eq!(session.phase(), FilterPhase::Ready);
            assert_eq!(headings(&session), vec!["Bake", "Deploy"]);
            assert_eq!(session.application().executions[0].name, "Deploy");
        }
    }

    #[test]
    fn already_loaded_application_is_grouped_at_construction() {
        let (signal_tx, mut signal_rx) = unbounded_channel();
        let session = ExecutionsSession::new(
            Application::loaded("deck", executions(), configs()),
            ExecutionFilterModel::new(),
            services(Arc::new(ViewStateCacheRegistry::ephemeral()), None, Some(signal_tx)),
            &SessionConfig::default(),
        )
        .expect("session");

        assert!(!session.view_state().loading);
        assert_eq!(headings(&session), vec!["Bake", "Deploy"]);
        assert_eq!(signal_rx.try_recv().ok(), Some(SessionSignal::GroupsUpdated { group_count: 2 }));
    }

    #[test]
    fn late_data_only_renames_after_initial_render() {
        let mut session = ExecutionsSession::new(
            Application::loaded("deck", executions(), configs()),
            ExecutionFilterModel::new(),
            services(Arc::new(ViewStateCacheRegistry::ephemeral()), None, None),
            &SessionConfig::default(),
        )
        .expect("session");

        session.handle_event(ApplicationEvent::ExecutionsReloaded {
            executions: vec![Execution::new("e9", "raw").with_config_id("cfg-bake")],
        });
        assert_eq!(session.application().executions[0].name, "Bake");
        assert_eq!(session.groups()[0].total_count, 1);
        assert_eq!(headings(&session), vec!["Bake", "Deploy"]);

        session.handle_event(ApplicationEvent::PipelineConfigsLoaded {
            configs: vec![PipelineConfig::new("cfg-bake", "Bake Image")],
        });
        assert_eq!(session.application().executions[0].name, "Bake Image");
        assert_eq!(headings(&session), vec!["Bake", "Deploy"]);
    }

    #[test]
    fn load_failure_is_terminal() {
        let mut session = loading_session(Arc::new(ViewStateCacheRegistry::ephemeral()));
        session.handle_event(ApplicationEvent::ExecutionsLoadFailure {
            message: Some("503 from executions endpoint".into()),
        });

        let state = session.view_state();
        assert!(!state.loading);
        assert!(state.initialization_error);
        assert_eq!(session.load_error(), Some("503 from executions endpoint"));

        session.handle_event(ApplicationEvent::ExecutionsLoaded { executions: executions() });
        session.handle_event(ApplicationEvent::PipelineConfigsLoaded { configs: configs() });
        assert_eq!(session.phase(), FilterPhase::Failed);
        assert!(session.groups().is_empty());
    }

    #[test]
    fn switching_applications_discards_previous_groups() {
        let caches = Arc::new(ViewStateCacheRegistry::ephemeral());
        let first = ExecutionsSession::new(
            Application::loaded("deck", executions(), configs()),
            ExecutionFilterModel::new(),
            services(Arc::clone(&caches), None, None),
            &SessionConfig::default(),
        )
        .expect("session");
        let (_, model) = first.teardown();
        assert_eq!(model.groups.len(), 2);

        let second = ExecutionsSession::new(
            Application::loading("gate"),
            model,
            services(caches, None, None),
            &SessionConfig::default(),
        )
        .expect("session");
        assert!(second.groups().is_empty());
        assert!(second.tags().is_empty());
        assert!(second.view_state().loading);
    }

    #[test]
    fn filter_changes_persist_and_rehydrate_per_application() {
        let dir = tempfile::tempdir().expect("tempdir");
        let caches = Arc::new(ViewStateCacheRegistry::new(dir.path().to_path_buf()));
        let mut session = ExecutionsSession::new(
            Application::loaded("deck", executions(), configs()),
            ExecutionFilterModel::new(),
            services(Arc::clone(&caches), None, None),
            &SessionConfig::default(),
        )
        .expect("session");

        assert_eq!(session.set_count(10), Ok(FilterChange::Changed));
        assert_eq!(session.set_count(10), Ok(FilterChange::Unchanged));
        assert_eq!(session.set_count(3), Err(FilterError::UnsupportedCount(3)));
        assert_eq!(
            session.update_filter(|filter| filter.group_by = GroupBy::Ungrouped),
            FilterChange::Changed
        );
        assert_eq!(session.groups().len(), 1);
        let (_, model) = session.teardown();

        // A fresh registry over the same directory reads what the first one wrote.
        let reopened = Arc::new(ViewStateCacheRegistry::new(dir.path().to_path_buf()));
        let restored = ExecutionsSession::new(
            Application::loading("deck"),
            ExecutionFilterModel::new(),
            services(Arc::clone(&reopened), None, None),
            &SessionConfig::default(),
        )
        .expect("session");
        assert_eq!(restored.filter().count, 10);
        assert_eq!(restored.filter().group_by, GroupBy::Ungrouped);

        let other = ExecutionsSession::new(
            Application::loading("gate"),
            model,
            services(reopened, None, None),
            &SessionConfig::default(),
        )
        .expect("session");
        assert_eq!(other.filter().count, 10);
        assert_eq!(other.filter_count_options(), &[1, 2, 5, 10, 25, 50, 100]);
    }

    #[test]
    fn unusable_cache_file_neither_blocks_the_session_nor_filter_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("executions.json")).expect("occupy cache path");
        let caches = Arc::new(ViewStateCacheRegistry::new(dir.path().to_path_buf()));
        let (signal_tx, mut signal_rx) = unbounded_channel();

        let mut session = ExecutionsSession::new(
            Application::loaded("deck", executions(), configs()),
            ExecutionFilterModel::new(),
            services(caches, None, Some(signal_tx)),
            &SessionConfig::default(),
        )
        .expect("session despite unreadable cache file");
        assert_eq!(session.phase(), FilterPhase::Ready);

        assert_eq!(session.update_filter(|filter| filter.search = "bake".into()), FilterChange::Changed);
        assert_eq!(session.filter().search, "bake");
        assert_eq!(headings(&session), vec!["Bake"]);

        let mut signals = Vec::new();
        while let Ok(signal) = signal_rx.try_recv() {
            signals.push(signal);
        }
        assert!(signals.contains(&SessionSignal::FilterChanged));
    }

    #[test]
    fn teardown_before_ready_never_groups() {
        let session = loading_session(Arc::new(ViewStateCacheRegistry::ephemeral()));
        let token = session.shutdown_token();
        let (application, model) = session.teardown();
        assert!(token.is_cancelled());
        assert!(!application.executions_loaded);
        assert!(model.groups.is_empty());
    }

    #[test]
    fn events_after_shutdown_are_ignored() {
        let mut session = loading_session(Arc::new(ViewStateCacheRegistry::ephemeral()));
        session.handle_event(ApplicationEvent::ExecutionsLoaded { executions: executions() });
        session.shutdown_token().cancel();
        session.handle_event(ApplicationEvent::PipelineConfigsLoaded { configs: configs() });

        assert!(session.view_state().loading);
        assert!(session.application().pipeline_configs_loading);
    }

    #[test]
    fn navigation_and_expansion() {
        let (signal_tx, mut signal_rx) = unbounded_channel();
        let mut session = ExecutionsSession::new(
            Application::loading("deck"),
            ExecutionFilterModel::new(),
            services(Arc::new(ViewStateCacheRegistry::ephemeral()), None, Some(signal_tx)),
            &SessionConfig::default(),
        )
        .expect("session");

        session.handle_event(ApplicationEvent::NavigationChanged {
            execution_id: Some("e2".into()),
        });
        assert_eq!(session.details_target(), Some("e2"));
        session.handle_event(ApplicationEvent::NavigationChanged { execution_id: None });
        assert_eq!(session.details_target(), None);

        session.toggle_expansion(true);
        assert_eq!(signal_rx.try_recv().ok(), Some(SessionSignal::ToggleExpansion(true)));
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown_or_closed_channel() {
        let mut session = loading_session(Arc::new(ViewStateCacheRegistry::ephemeral()));
        let (event_tx, mut event_rx) = unbounded_channel();
        event_tx
            .send(ApplicationEvent::ExecutionsLoaded { executions: executions() })
            .expect("send");
        event_tx
            .send(ApplicationEvent::PipelineConfigsLoaded { configs: configs() })
            .expect("send");
        drop(event_tx);

        assert_eq!(session.run(&mut event_rx).await, RunExit::Closed);
        assert_eq!(session.phase(), FilterPhase::Ready);

        let (_event_tx, mut event_rx) = unbounded_channel();
        session.shutdown_token().cancel();
        assert_eq!(session.run(&mut event_rx).await, RunExit::Shutdown);
    }

    #[tokio::test]
    async fn dismissed_prompt_starts_nothing() {
        let session = loading_session(Arc::new(ViewStateCacheRegistry::ephemeral()));
        assert!(session.trigger_pipeline().await.is_none());
        assert!(!session.view_state().triggering_execution);
    }

    #[tokio::test]
    async fn prompted_trigger_runs_to_appearance() {
        let command = TriggerCommand::new("Deploy", json!({"type": "manual"}));
        let session = ExecutionsSession::new(
            Application::loading("deck"),
            ExecutionFilterModel::new(),
            services(Arc::new(ViewStateCacheRegistry::ephemeral()), Some(command), None),
            &SessionConfig::default(),
        )
        .expect("session");

        let pending = session.trigger_pipeline().await.expect("prompt accepted");
        assert!(session.view_state().triggering_execution);
        let outcome = pending.await.expect("outcome");
        assert_eq!(outcome.execution_id(), "new-run");
        assert!(!session.view_state().triggering_execution);
        assert!(session.view_state().poll.is_none());
    }
}
