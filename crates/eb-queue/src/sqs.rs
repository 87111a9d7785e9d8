//! SQS consumer and notification publisher

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use eb_common::{BridgeError, NotificationMessage, NotificationSink};
use eb_workflow::EventProcessor;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{process_batch, EventConsumer, QueueError, QueuedMessage, Result};

/// Build an SQS client from the default AWS provider chain
pub async fn default_client() -> Client {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    Client::new(&config)
}

#[derive(Debug, Clone)]
pub struct SqsConsumerConfig {
    pub queue_url: String,
    pub wait_time_seconds: i32,
    pub max_messages: i32,
    pub visibility_timeout: Option<i32>,
}

impl SqsConsumerConfig {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            wait_time_seconds: 20,
            max_messages: 10,
            visibility_timeout: None,
        }
    }
}

pub struct SqsEventConsumer {
    client: Client,
    config: SqsConsumerConfig,
}

impl SqsEventConsumer {
    pub fn new(client: Client, config: SqsConsumerConfig) -> Self {
        Self { client, config }
    }

    async fn receive(&self) -> Result<Vec<QueuedMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(self.config.max_messages)
            .wait_time_seconds(self.config.wait_time_seconds)
            .set_visibility_timeout(self.config.visibility_timeout)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(QueuedMessage {
                    receipt: m.receipt_handle()?.to_string(),
                    body: m.body()?.to_string(),
                })
            })
            .collect())
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for SqsEventConsumer {
    fn identifier(&self) -> &str {
        &self.config.queue_url
    }

    async fn run(
        &self,
        processor: Arc<EventProcessor>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(queue_url = %self.config.queue_url, "SQS consumer started");

        loop {
            let batch = tokio::select! {
                _ = shutdown.recv() => break,
                batch = self.receive() => batch,
            };

            let messages = match batch {
                Ok(messages) => messages,
                Err(e) => {
                    error!(error = %e, queue_url = %self.config.queue_url, "Receive failed");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            if messages.is_empty() {
                continue;
            }
            debug!(count = messages.len(), "Received batch");

            for receipt in process_batch(&processor, messages).await {
                if let Err(e) = self.delete(&receipt).await {
                    warn!(error = %e, "Failed to delete message");
                }
            }
        }

        info!(queue_url = %self.config.queue_url, "SQS consumer stopped");
        Ok(())
    }
}

/// Publishes notifications as JSON messages to an SQS queue
pub struct SqsNotificationPublisher {
    client: Client,
    queue_url: String,
}

impl SqsNotificationPublisher {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for SqsNotificationPublisher {
    fn identifier(&self) -> &str {
        &self.queue_url
    }

    async fn publish(&self, message: &NotificationMessage) -> eb_common::Result<()> {
        let body = serde_json::to_string(message)
            .map_err(|e| BridgeError::publish(&self.queue_url, e.to_string()))?;

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| BridgeError::publish(&self.queue_url, e.to_string()))?;

        debug!(queue_url = %self.queue_url, "Notification published");
        Ok(())
    }
}
