//! EventProcessor - single entry point for inbound events
//!
//! Runs the getter workflow when one exists for the event's key, otherwise
//! performs a plain router pass. Errors never escape; the outcome tells the
//! ingestion layer whether to acknowledge the event.

use std::sync::Arc;

use eb_common::InboundEvent;
use eb_router::{EventRouter, RouteOutcome};
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::executor::{WorkflowExecutor, WorkflowRun};
use crate::workflow::{WorkflowSet, WorkflowState};

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Routed(RouteOutcome),
    Workflow(WorkflowRun),
}

impl ProcessOutcome {
    /// Whether the event should be removed from the bus
    pub fn should_ack(&self) -> bool {
        match self {
            ProcessOutcome::Routed(outcome) => outcome.should_ack(),
            ProcessOutcome::Workflow(run) => match run.state() {
                WorkflowState::Completed => true,
                WorkflowState::Failed { reason } => !reason.is_retryable(),
                _ => false,
            },
        }
    }

    pub fn summary(&self) -> OutcomeSummary {
        match self {
            ProcessOutcome::Routed(RouteOutcome::Dispatched { rule, response }) => OutcomeSummary {
                status: "dispatched",
                rule: Some(rule.clone()),
                status_code: Some(response.status_code),
                ..OutcomeSummary::new(self.should_ack())
            },
            ProcessOutcome::Routed(RouteOutcome::Unroutable { .. }) => OutcomeSummary {
                status: "unroutable",
                error_kind: Some("NotFound"),
                ..OutcomeSummary::new(self.should_ack())
            },
            ProcessOutcome::Routed(RouteOutcome::Failed { rule, error }) => OutcomeSummary {
                status: "failed",
                rule: Some(rule.clone()),
                error_kind: Some(error.kind()),
                error: Some(error.to_string()),
                ..OutcomeSummary::new(self.should_ack())
            },
            ProcessOutcome::Workflow(run) => OutcomeSummary {
                status: run.state().name(),
                workflow: Some(run.workflow_id.clone()),
                execution_id: Some(run.execution_id.clone()),
                status_code: run.response.as_ref().map(|r| r.status_code),
                error_kind: run.error().map(|e| e.kind()),
                error: run.error().map(|e| e.to_string()),
                ..OutcomeSummary::new(self.should_ack())
            },
        }
    }
}

/// Serializable view of a processing outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub status: &'static str,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeSummary {
    fn new(acknowledged: bool) -> Self {
        Self {
            status: "",
            acknowledged,
            rule: None,
            workflow: None,
            execution_id: None,
            status_code: None,
            error_kind: None,
            error: None,
        }
    }
}

pub struct EventProcessor {
    router: Arc<EventRouter>,
    workflows: Arc<WorkflowSet>,
    executor: Arc<WorkflowExecutor>,
}

impl EventProcessor {
    pub fn new(
        router: Arc<EventRouter>,
        workflows: Arc<WorkflowSet>,
        executor: Arc<WorkflowExecutor>,
    ) -> Self {
        Self {
            router,
            workflows,
            executor,
        }
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn workflows(&self) -> &Arc<WorkflowSet> {
        &self.workflows
    }

    pub async fn process(&self, event: &InboundEvent) -> ProcessOutcome {
        let span = info_span!(
            "event",
            event_id = %event.id,
            source = %event.source,
            event_type = %event.event_type
        );

        async {
            match self.workflows.for_event(event) {
                Some(workflow) => ProcessOutcome::Workflow(self.executor.run(workflow, event).await),
                None => ProcessOutcome::Routed(self.router.route(event).await),
            }
        }
        .instrument(span)
        .await
    }

    /// Cancel in-flight workflows
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}
