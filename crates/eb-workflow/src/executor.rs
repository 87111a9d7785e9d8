//! WorkflowExecutor - drives a workflow's state machine for one event
//!
//! The backend call goes through the EventRouter so resolution, timeout
//! and failure classification match a plain router pass. Publishing only
//! happens after a successful call; shutdown abandons an in-flight call
//! without publishing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eb_common::{BackendResponse, BridgeError, InboundEvent, NotificationMessage, NotificationSink};
use eb_router::EventRouter;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::notification::format_notification;
use crate::workflow::{Workflow, WorkflowState};

/// Record of one workflow execution
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub execution_id: String,
    pub workflow_id: String,
    /// Every state entered, starting with `Start`
    pub history: Vec<WorkflowState>,
    pub response: Option<BackendResponse>,
    pub notification: Option<NotificationMessage>,
}

impl WorkflowRun {
    pub fn state(&self) -> &WorkflowState {
        self.history.last().unwrap_or(&WorkflowState::Start)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state(), WorkflowState::Completed)
    }

    pub fn error(&self) -> Option<&BridgeError> {
        match self.state() {
            WorkflowState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

pub struct WorkflowExecutor {
    router: Arc<EventRouter>,
    sink: Arc<dyn NotificationSink>,
    publish_timeout: Duration,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkflowExecutor {
    pub fn new(
        router: Arc<EventRouter>,
        sink: Arc<dyn NotificationSink>,
        publish_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            router,
            sink,
            publish_timeout,
            running: AtomicBool::new(true),
            shutdown_tx,
        }
    }

    /// Cancel in-flight runs and refuse new ones
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Workflow executor shutting down");
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn run(&self, workflow: &Workflow, event: &InboundEvent) -> WorkflowRun {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut run = WorkflowRun {
            execution_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow.id().to_string(),
            history: vec![WorkflowState::Start],
            response: None,
            notification: None,
        };

        loop {
            let next = match run.state().clone() {
                WorkflowState::Start => {
                    if self.is_running() {
                        WorkflowState::CallBackend
                    } else {
                        WorkflowState::Failed {
                            reason: BridgeError::Cancelled,
                        }
                    }
                }
                WorkflowState::CallBackend => {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => {
                            warn!(
                                execution_id = %run.execution_id,
                                workflow_id = %run.workflow_id,
                                "Abandoning backend call on shutdown"
                            );
                            WorkflowState::Failed { reason: BridgeError::Cancelled }
                        }
                        result = self.router.dispatch(workflow.rule(), event) => match result {
                            Ok(response) => {
                                run.response = Some(response);
                                WorkflowState::PublishNotification
                            }
                            Err(reason) => WorkflowState::Failed { reason },
                        },
                    }
                }
                WorkflowState::PublishNotification => self.publish(workflow, &mut run).await,
                WorkflowState::Completed | WorkflowState::Failed { .. } => break,
            };

            debug!(
                execution_id = %run.execution_id,
                workflow_id = %run.workflow_id,
                from = run.state().name(),
                to = next.name(),
                "Workflow transition"
            );
            run.history.push(next);
        }

        match run.state() {
            WorkflowState::Completed => info!(
                execution_id = %run.execution_id,
                workflow_id = %run.workflow_id,
                "Workflow completed"
            ),
            state => warn!(
                execution_id = %run.execution_id,
                workflow_id = %run.workflow_id,
                state = %state,
                "Workflow failed"
            ),
        }
        metrics::counter!("eb_workflows_total", "state" => run.state().name()).increment(1);

        run
    }

    async fn publish(&self, workflow: &Workflow, run: &mut WorkflowRun) -> WorkflowState {
        let Some(response) = run.response.as_ref() else {
            return WorkflowState::Failed {
                reason: BridgeError::malformed("response"),
            };
        };

        let message = match format_notification(response, workflow.result_binding()) {
            Ok(message) => message,
            Err(reason) => return WorkflowState::Failed { reason },
        };

        match tokio::time::timeout(self.publish_timeout, self.sink.publish(&message)).await {
            Ok(Ok(())) => {
                metrics::counter!("eb_notifications_published_total").increment(1);
                run.notification = Some(message);
                WorkflowState::Completed
            }
            Ok(Err(reason)) => WorkflowState::Failed { reason },
            Err(_) => WorkflowState::Failed {
                reason: BridgeError::publish(
                    self.sink.identifier(),
                    format!("no acknowledgement within {}ms", self.publish_timeout.as_millis()),
                ),
            },
        }
    }
}
