//! Shared type definitions for Runboard.
//!
//! These records are exchanged between the data provider, the engine that
//! coordinates an executions view, and the hosts that render it.

pub mod event;
pub mod execution;
pub mod filter;
pub mod trigger;

pub use event::{ApplicationEvent, SessionSignal};
pub use execution::{Application, Execution, ExecutionStatus, PipelineConfig};
pub use filter::{DEFAULT_FILTER_COUNT, ExecutionFilter, ExecutionFilterModel, ExecutionGroup, FILTER_COUNT_OPTIONS, FilterTag, GroupBy};
pub use trigger::{PollHandle, TriggerCommand, TriggerReceipt, TriggerState, ViewState};
