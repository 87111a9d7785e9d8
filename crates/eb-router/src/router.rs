//! EventRouter - maps inbound events to backend calls
//!
//! Per event: rule lookup, parameter resolution, backend call, outcome
//! recording. Failures are reported, never retried here; redelivery is
//! left to the event bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eb_common::{BackendResponse, BridgeError, DispatchRule, InboundEvent, Result, RuleKey};
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::registry::RuleRegistry;
use crate::resolve::resolve_request;

/// Result of routing one event
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Backend call completed with a success status
    Dispatched { rule: String, response: BackendResponse },
    /// No rule for the event's `(source, type)`; the event is dropped
    Unroutable { key: RuleKey },
    /// Resolution or the backend call failed
    Failed { rule: String, error: BridgeError },
}

impl RouteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RouteOutcome::Dispatched { .. })
    }

    /// Whether the bus should consider the event handled
    pub fn should_ack(&self) -> bool {
        match self {
            RouteOutcome::Dispatched { .. } | RouteOutcome::Unroutable { .. } => true,
            RouteOutcome::Failed { error, .. } => !error.is_retryable(),
        }
    }
}

pub struct EventRouter {
    registry: Arc<RuleRegistry>,
    backend: Arc<dyn BackendClient>,
    call_timeout: Duration,
}

impl EventRouter {
    pub fn new(
        registry: Arc<RuleRegistry>,
        backend: Arc<dyn BackendClient>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            backend,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Route one event. Never fails; the outcome carries any error.
    pub async fn route(&self, event: &InboundEvent) -> RouteOutcome {
        let rule = match self.registry.lookup(&event.source, &event.event_type) {
            Ok(rule) => rule.clone(),
            Err(_) => {
                let key = event.key();
                warn!(
                    event_id = %event.id,
                    key = %key,
                    "Unroutable event, dropping"
                );
                metrics::counter!("eb_events_unroutable_total").increment(1);
                return RouteOutcome::Unroutable { key };
            }
        };

        match self.dispatch(&rule, event).await {
            Ok(response) => RouteOutcome::Dispatched {
                rule: rule.name.clone(),
                response,
            },
            Err(error) => RouteOutcome::Failed {
                rule: rule.name.clone(),
                error,
            },
        }
    }

    /// Resolve and perform the rule's backend call for `event`.
    ///
    /// A non-2xx status or a timeout is a `BackendCallFailure`.
    pub async fn dispatch(&self, rule: &DispatchRule, event: &InboundEvent) -> Result<BackendResponse> {
        let request = resolve_request(rule, event).map_err(|e| {
            warn!(
                event_id = %event.id,
                rule = %rule.name,
                error = %e,
                "Failed to resolve request, not dispatching"
            );
            record_failure(&rule.name, &e);
            e
        })?;

        debug!(
            event_id = %event.id,
            rule = %rule.name,
            method = %request.method,
            target = %request.path_and_query(),
            "Dispatching event"
        );

        let start = Instant::now();
        let result = match tokio::time::timeout(self.call_timeout, self.backend.call(&request)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::backend(
                None,
                format!("no response within {}ms", self.call_timeout.as_millis()),
            )),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let response = result
            .and_then(|response| {
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(BridgeError::backend(
                        Some(response.status_code),
                        format!("{} {} returned {}", request.method, request.path, response.status_code),
                    ))
                }
            })
            .map_err(|e| {
                warn!(
                    event_id = %event.id,
                    rule = %rule.name,
                    duration_ms = duration_ms,
                    error = %e,
                    "Backend call failed"
                );
                record_failure(&rule.name, &e);
                e
            })?;

        info!(
            event_id = %event.id,
            rule = %rule.name,
            status = response.status_code,
            duration_ms = duration_ms,
            "Event dispatched"
        );
        metrics::counter!("eb_events_routed_total", "rule" => rule.name.clone()).increment(1);
        Ok(response)
    }
}

fn record_failure(rule: &str, error: &BridgeError) {
    metrics::counter!(
        "eb_dispatch_failures_total",
        "rule" => rule.to_string(),
        "reason" => error.kind()
    )
    .increment(1);
}
