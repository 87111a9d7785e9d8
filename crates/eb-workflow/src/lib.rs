//! Event Bridge Workflows
//!
//! Getter events are wrapped in a two-stage workflow: call the backend, then
//! publish the result to a notification sink.
//! - notification: formats the backend result into a notification message
//! - sink: log, HTTP and in-memory notification sinks
//! - workflow: workflow definitions, states and the builder
//! - executor: state machine executor with publish timeout and shutdown
//! - processor: per-event entry point choosing workflow or plain routing

pub mod executor;
pub mod notification;
pub mod processor;
pub mod sink;
pub mod workflow;

pub use executor::{WorkflowExecutor, WorkflowRun};
pub use notification::{format_notification, ResultBinding};
pub use processor::{EventProcessor, OutcomeSummary, ProcessOutcome};
pub use sink::{HttpSink, LogSink, MemorySink};
pub use workflow::{workflow_id, Stage, Workflow, WorkflowBuilder, WorkflowSet, WorkflowState};
