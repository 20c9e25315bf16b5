//! Manual pipeline triggering and the wait for the new execution to show up.
//!
//! [`TriggerMonitor::trigger`] raises the busy flag before it returns, submits
//! the trigger, then waits on the appearance poller. The flag lives in a
//! [`BusyGuard`], so it drops back to `false` exactly once on every exit path,
//! including when the returned future is dropped mid-flight. Observers read the
//! state through a `watch` channel and never write it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::{self, BoxFuture, FutureExt};
use runboard_types::{PollHandle, SessionSignal, TriggerCommand, TriggerReceipt, TriggerState};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::{debug, info, warn};

use crate::emit_signal;

/// Submits a manual pipeline trigger.
#[async_trait]
pub trait PipelineTriggerService: Send + Sync {
    /// Returns a reference whose last path segment is the new execution id.
    async fn trigger_pipeline(&self, application: &str, pipeline_name: &str, trigger: &Value) -> anyhow::Result<TriggerReceipt>;
}

/// Resolves once a triggered execution is visible in the application's list.
///
/// Retry and backoff are the implementation's business; an error means it gave up.
#[async_trait]
pub trait ExecutionAppearancePoller: Send + Sync {
    async fn wait_until_new_triggered_pipeline_appears(
        &self,
        application: &str,
        pipeline_name: &str,
        execution_id: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("a pipeline trigger is already in flight")]
    AlreadyTriggering,
    #[error("failed to trigger pipeline '{pipeline_name}': {source}")]
    Submission {
        pipeline_name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("trigger service returned an unusable execution reference '{0}'")]
    MalformedReference(String),
}

/// How a submitted trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The new execution is visible in the list.
    Appeared { execution_id: String },
    /// The poller gave up; the execution may still show up on a later refresh.
    PollExhausted { execution_id: String, reason: String },
}

impl TriggerOutcome {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Appeared { execution_id } | Self::PollExhausted { execution_id, .. } => execution_id,
        }
    }
}

pub type TriggerFuture = BoxFuture<'static, Result<TriggerOutcome, TriggerError>>;

/// Extracts the execution id from a trigger reference such as `pipelines/01HZX`.
pub fn execution_id_from_reference(reference: &str) -> Option<String> {
    let id = reference.trim().rsplit('/').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Drives manual triggers for one application.
#[derive(Clone)]
pub struct TriggerMonitor {
    application: String,
    trigger_service: Arc<dyn PipelineTriggerService>,
    poller: Arc<dyn ExecutionAppearancePoller>,
    state: Arc<watch::Sender<TriggerState>>,
    signals: Option<UnboundedSender<SessionSignal>>,
}

impl TriggerMonitor {
    pub fn new(
        application: &str,
        trigger_service: Arc<dyn PipelineTriggerService>,
        poller: Arc<dyn ExecutionAppearancePoller>,
        signals: Option<UnboundedSender<SessionSignal>>,
    ) -> Self {
        let (state, _) = watch::channel(TriggerState::default());
        Self {
            application: application.to_string(),
            trigger_service,
            poller,
            state: Arc::new(state),
            signals,
        }
    }

    pub fn is_triggering(&self) -> bool {
        self.state.borrow().triggering
    }

    /// The outstanding poll, if any.
    pub fn poll_handle(&self) -> Option<PollHandle> {
        self.state.borrow().poll.clone()
    }

    pub fn state(&self) -> TriggerState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every busy-state change.
    pub fn subscribe(&self) -> watch::Receiver<TriggerState> {
        self.state.subscribe()
    }

    /// Starts a trigger. The busy flag is already set when this returns.
    ///
    /// A call made while another trigger is in flight resolves to
    /// [`TriggerError::AlreadyTriggering`] and leaves the running one alone.
    pub fn trigger(&self, command: TriggerCommand) -> TriggerFuture {
        let Some(guard) = BusyGuard::acquire(Arc::clone(&self.state), self.signals.clone()) else {
            warn!(
                application = %self.application,
                pipeline = %command.pipeline_name,
                "ignoring trigger while another one is in flight"
            );
            return future::ready(Err(TriggerError::AlreadyTriggering)).boxed();
        };

        let application = self.application.clone();
        let trigger_service = Arc::clone(&self.trigger_service);
        let poller = Arc::clone(&self.poller);

        async move {
            let pipeline_name = command.pipeline_name;
            debug!(application = %application, pipeline = %pipeline_name, "submitting pipeline trigger");

            let receipt = match trigger_service
                .trigger_pipeline(&application, &pipeline_name, &command.trigger)
                .await
            {
                Ok(receipt) => receipt,
                Err(error) => {
                    warn!(application = %application, pipeline = %pipeline_name, error = %error, "pipeline trigger rejected");
                    return Err(TriggerError::Submission {
                        pipeline_name,
                        source: error.into(),
                    });
                }
            };

            let Some(execution_id) = execution_id_from_reference(&receipt.reference) else {
                warn!(application = %application, reference = %receipt.reference, "trigger reference has no execution id");
                return Err(TriggerError::MalformedReference(receipt.reference));
            };

            guard.publish_poll(PollHandle {
                pipeline_name: pipeline_name.clone(),
                execution_id: execution_id.clone(),
                started_at: Utc::now(),
            });
            debug!(application = %application, execution_id = %execution_id, "waiting for triggered execution");

            let outcome = match poller
                .wait_until_new_triggered_pipeline_appears(&application, &pipeline_name, &execution_id)
                .await
            {
                Ok(()) => {
                    info!(application = %application, execution_id = %execution_id, "triggered execution appeared");
                    TriggerOutcome::Appeared { execution_id }
                }
                Err(error) => {
                    warn!(application = %application, execution_id = %execution_id, error = %error, "gave up waiting for triggered execution");
                    TriggerOutcome::PollExhausted {
                        execution_id,
                        reason: format!("{error:#}"),
                    }
                }
            };
            drop(guard);
            Ok(outcome)
        }
        .boxed()
    }
}

/// Holds the busy flag for one trigger; releasing it is tied to `Drop`.
struct BusyGuard {
    state: Arc<watch::Sender<TriggerState>>,
    signals: Option<UnboundedSender<SessionSignal>>,
}

impl BusyGuard {
    fn acquire(state: Arc<watch::Sender<TriggerState>>, signals: Option<UnboundedSender<SessionSignal>>) -> Option<Self> {
        let acquired = state.send_if_modified(|current| {
            if current.triggering {
                return false;
            }
            current.triggering = true;
            current.poll = None;
            true
        });
        if !acquired {
            return None;
        }
        emit_signal(&signals, SessionSignal::TriggeringChanged(true));
        Some(Self { state, signals })
    }

    fn publish_poll(&self, handle: PollHandle) {
        self.state.send_modify(|current| current.poll = Some(handle));
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.send_modify(|current| {
            current.triggering = false;
            current.poll = None;
        });
        emit_signal(&self.signals, SessionSignal::TriggeringChanged(false));
    }
}
