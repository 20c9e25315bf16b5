//! Two-signal readiness gate for the initial render.
//!
//! The executions view must not group anything until both the execution list
//! and the pipeline configurations are available. [`LoadGate`] records the two
//! readiness conditions, reports [`LoadProgress::Ready`] exactly once when the
//! second one is satisfied, and stays silent after it has been disarmed or its
//! cancellation token fired.

use runboard_types::{Application, ApplicationEvent};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of feeding the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProgress {
    /// At least one condition is still unsatisfied.
    Pending,
    /// Both conditions are satisfied; reported once per gate.
    Ready,
    /// The gate already fired, was disarmed, or was cancelled.
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Armed,
    Fired,
    Disarmed,
}

/// Readiness join over the executions and pipeline configuration data sets.
#[derive(Debug)]
pub struct LoadGate {
    executions_ready: bool,
    configs_ready: bool,
    state: GateState,
    cancellation: CancellationToken,
}

impl LoadGate {
    /// Captures the readiness already reached by `application`.
    pub fn new(application: &Application, cancellation: CancellationToken) -> Self {
        Self {
            executions_ready: application.executions_loaded,
            configs_ready: !application.pipeline_configs_loading,
            state: GateState::Armed,
            cancellation,
        }
    }

    /// Fires when both conditions already hold, without waiting for a notification.
    pub fn poll_ready(&mut self) -> LoadProgress {
        if self.cancellation.is_cancelled() {
            self.state = GateState::Disarmed;
        }
        match self.state {
            GateState::Armed if self.executions_ready && self.configs_ready => {
                self.state = GateState::Fired;
                debug!("load gate satisfied");
                LoadProgress::Ready
            }
            GateState::Armed => LoadProgress::Pending,
            GateState::Fired | GateState::Disarmed => LoadProgress::Inactive,
        }
    }

    /// Records the readiness carried by `event`.
    pub fn observe(&mut self, event: &ApplicationEvent) -> LoadProgress {
        match event {
            ApplicationEvent::ExecutionsLoaded { .. } => self.executions_ready = true,
            ApplicationEvent::PipelineConfigsLoaded { .. } => self.configs_ready = true,
            _ => {}
        }
        self.poll_ready()
    }

    /// Stops the gate from ever reporting [`LoadProgress::Ready`].
    pub fn disarm(&mut self) {
        if self.state == GateState::Armed {
            debug!("load gate disarmed before readiness");
        }
        self.state = GateState::Disarmed;
    }

    pub fn executions_ready(&self) -> bool {
        self.executions_ready
    }

    pub fn configs_ready(&self) -> bool {
        self.configs_ready
    }

    pub fn has_fired(&self) -> bool {
        self.state == GateState::Fired
    }

    pub fn is_armed(&self) -> bool {
        self.state == GateState::Armed && !self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executions_loaded() -> ApplicationEvent {
        ApplicationEvent::ExecutionsLoaded { executions: Vec::new() }
    }

    fn configs_loaded() -> ApplicationEvent {
        ApplicationEvent::PipelineConfigsLoaded { configs: Vec::new() }
    }

    #[test]
    fn fires_immediately_when_both_ready_at_construction() {
        let application = Application::loaded("deck", Vec::new(), Vec::new());
        let mut gate = LoadGate::new(&application, CancellationToken::new());

        assert_eq!(gate.poll_ready(), LoadProgress::Ready);
        assert_eq!(gate.poll_ready(), LoadProgress::Inactive);
        assert!(gate.has_fired());
    }

    #[test]
    fn waits_for_both_notifications_in_either_order() {
        for order in [[executions_loaded(), configs_loaded()], [configs_loaded(), executions_loaded()]] {
            let mut gate = LoadGate::new(&Application::loading("deck"), CancellationToken::new());
            assert_eq!(gate.poll_ready(), LoadProgress::Pending);

            let [first, second] = order;
            assert_eq!(gate.observe(&first), LoadProgress::Pending);
            assert_eq!(gate.observe(&second), LoadProgress::Ready);
            assert_eq!(gate.observe(&second), LoadProgress::Inactive);
        }
    }

    #[test]
    fn duplicate_notifications_do_not_fire_early() {
        let mut gate = LoadGate::new(&Application::loading("deck"), CancellationToken::new());
        assert_eq!(gate.observe(&executions_loaded()), LoadProgress::Pending);
        assert_eq!(gate.observe(&executions_loaded()), LoadProgress::Pending);
        assert_eq!(gate.observe(&configs_loaded()), LoadProgress::Ready);
    }

    #[test]
    fn unrelated_events_leave_gate_pending() {
        let mut gate = LoadGate::new(&Application::loading("deck"), CancellationToken::new());
        let navigation = ApplicationEvent::NavigationChanged { execution_id: Some("e1".into()) };
        let reloaded = ApplicationEvent::ExecutionsReloaded { executions: Vec::new() };
        assert_eq!(gate.observe(&navigation), LoadProgress::Pending);
        assert_eq!(gate.observe(&reloaded), LoadProgress::Pending);
        assert!(!gate.executions_ready());
    }

    #[test]
    fn only_configs_pending_needs_one_notification() {
        let mut application = Application::loading("deck");
        application.executions_loaded = true;
        let mut gate = LoadGate::new(&application, CancellationToken::new());
        assert_eq!(gate.poll_ready(), LoadProgress::Pending);
        assert_eq!(gate.observe(&configs_loaded()), LoadProgress::Ready);
    }

    #[test]
    fn cancelled_gate_never_fires() {
        let token = CancellationToken::new();
        let mut gate = LoadGate::new(&Application::loading("deck"), token.child_token());
        assert_eq!(gate.observe(&executions_loaded()), LoadProgress::Pending);

        token.cancel();
        assert!(!gate.is_armed());
        assert_eq!(gate.observe(&configs_loaded()), LoadProgress::Inactive);
        assert!(!gate.has_fired());
    }

    #[test]
    fn disarmed_gate_never_fires() {
        let mut gate = LoadGate::new(&Application::loading("deck"), CancellationToken::new());
        gate.disarm();
        gate.observe(&executions_loaded());
        assert_eq!(gate.observe(&configs_loaded()), LoadProgress::Inactive);
    }
}
