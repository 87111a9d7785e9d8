//! Event Bridge Queue Integration
//!
//! Consumes event bus deliveries from a queue and feeds them into the
//! EventProcessor. Acknowledged messages are deleted; the rest stay on the
//! queue for redelivery.
//!
//! The SQS consumer and notification publisher live behind the `sqs` feature.

use std::sync::Arc;

use async_trait::async_trait;
use eb_common::InboundEvent;
use eb_workflow::EventProcessor;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[cfg(feature = "sqs")]
pub mod sqs;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("SQS error: {0}")]
    Sqs(String),
    #[error("Invalid message body: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A message pulled from the queue, not yet acknowledged
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub receipt: String,
    pub body: String,
}

/// Long-running source of events
#[async_trait]
pub trait EventConsumer: Send + Sync {
    fn identifier(&self) -> &str;

    /// Consume until a shutdown signal arrives
    async fn run(
        &self,
        processor: Arc<EventProcessor>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()>;
}

/// Parse an event bus delivery body (EventBridge envelope or short form)
pub fn parse_event(body: &str) -> Result<InboundEvent> {
    Ok(serde_json::from_str(body)?)
}

/// Process one received batch concurrently.
///
/// Returns the receipts of messages that should be deleted. Bodies that
/// cannot be parsed are acknowledged, since redelivery cannot fix them.
pub async fn process_batch(processor: &EventProcessor, messages: Vec<QueuedMessage>) -> Vec<String> {
    let tasks = messages.into_iter().map(|message| async move {
        let event = match parse_event(&message.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable queue message");
                metrics::counter!("eb_queue_invalid_messages_total").increment(1);
                return Some(message.receipt);
            }
        };

        let outcome = processor.process(&event).await;
        if outcome.should_ack() {
            Some(message.receipt)
        } else {
            debug!(event_id = %event.id, "Leaving message for redelivery");
            None
        }
    });

    futures::future::join_all(tasks)
        .await
        .into_iter()
        .flatten()
        .collect()
}
