//! # Runboard Engine
//!
//! Coordinates the executions view of a single application: it waits for the
//! execution list and the pipeline configurations, joins them, groups them
//! under user-controlled filter criteria that survive navigation, and follows
//! a manually triggered execution until it shows up in the list.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use runboard_engine::{
//!     DefaultExecutionFilterService, ExecutionsSession, ManualExecutionPrompt, PipelineTriggerService,
//!     PollPolicy, RetryingAppearancePoller, SessionConfig, SessionServices, ExecutionSource,
//! };
//! use runboard_types::{Application, ApplicationEvent, ExecutionFilterModel, TriggerCommand, TriggerReceipt};
//! use runboard_util::ViewStateCacheRegistry;
//!
//! struct Offline;
//!
//! #[async_trait::async_trait]
//! impl PipelineTriggerService for Offline {
//!     async fn trigger_pipeline(&self, _: &str, _: &str, _: &serde_json::Value) -> anyhow::Result<TriggerReceipt> {
//!         anyhow::bail!("offline")
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl ExecutionSource for Offline {
//!     async fn execution_ids(&self, _: &str) -> anyhow::Result<Vec<String>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl ManualExecutionPrompt for Offline {
//!     async fn request_trigger(&self, _: &Application) -> Option<TriggerCommand> {
//!         None
//!     }
//! }
//!
//! let services = SessionServices {
//!     filter_service: Arc::new(DefaultExecutionFilterService::new()),
//!     trigger_service: Arc::new(Offline),
//!     poller: Arc::new(RetryingAppearancePoller::new(Offline, PollPolicy::default())),
//!     prompt: Arc::new(Offline),
//!     caches: Arc::new(ViewStateCacheRegistry::ephemeral()),
//!     signals: None,
//! };
//! let mut session = ExecutionsSession::new(
//!     Application::loading("deck"),
//!     ExecutionFilterModel::new(),
//!     services,
//!     &SessionConfig::default(),
//! )?;
//! session.handle_event(ApplicationEvent::ExecutionsLoaded { executions: Vec::new() });
//! session.handle_event(ApplicationEvent::PipelineConfigsLoaded { configs: Vec::new() });
//! assert!(!session.view_state().loading);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`normalize`**: renames executions after their pipeline configuration
//! - **`load`**: two-signal readiness gate for the initial render
//! - **`grouping`**: filter/group service seam and its default implementation
//! - **`filter`**: filter criteria lifecycle and persistence
//! - **`trigger`**: manual trigger submission and busy-state tracking
//! - **`poller`**: bounded polling for a triggered execution
//! - **`session`**: wires everything for one application
//! - **`config`**: session tunables loaded from YAML or JSON

use runboard_types::SessionSignal;
use tokio::sync::mpsc::UnboundedSender;

pub mod config;
pub mod filter;
pub mod grouping;
pub mod load;
pub mod normalize;
pub mod poller;
pub mod session;
pub mod trigger;

// Re-export commonly used types for convenience
pub use config::{PollSettings, SessionConfig, load_config_file};
pub use filter::{FilterChange, FilterController, FilterError, FilterPhase};
pub use grouping::{DefaultExecutionFilterService, ExecutionFilterService, UNGROUPED_HEADING, render_query_params};
pub use load::{LoadGate, LoadProgress};
pub use normalize::{NormalizeReport, normalize_application, normalize_execution_names};
pub use poller::{ExecutionSource, PollError, PollPolicy, RetryingAppearancePoller};
pub use session::{ExecutionsSession, ManualExecutionPrompt, RunExit, SessionServices};
pub use trigger::{
    ExecutionAppearancePoller, PipelineTriggerService, TriggerError, TriggerFuture, TriggerMonitor, TriggerOutcome,
    execution_id_from_reference,
};

/// Sends `signal` to the presentation layer, if one is listening.
pub(crate) fn emit_signal(signals: &Option<UnboundedSender<SessionSignal>>, signal: SessionSignal) {
    if let Some(sender) = signals {
        let _ = sender.send(signal);
    }
}
