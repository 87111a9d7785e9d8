//! Notification sinks
//!
//! - LogSink: writes notifications to the log
//! - HttpSink: POSTs notifications as JSON to a URL
//! - MemorySink: keeps notifications in memory (dry runs, tests)

use std::time::Duration;

use async_trait::async_trait;
use eb_common::{BridgeError, NotificationMessage, NotificationSink, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new("log")
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &NotificationMessage) -> Result<()> {
        info!(
            sink = %self.name,
            date = %message.date,
            status_code = message.status_code,
            status_text = %message.status_text,
            response_body = %message.response_body,
            "Notification"
        );
        Ok(())
    }
}

pub struct HttpSink {
    url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl NotificationSink for HttpSink {
    fn identifier(&self) -> &str {
        &self.url
    }

    async fn publish(&self, message: &NotificationMessage) -> Result<()> {
        debug!(url = %self.url, "Publishing notification");

        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| BridgeError::publish(&self.url, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.url, status = %status, "Notification rejected");
            Err(BridgeError::publish(&self.url, format!("HTTP {}: {}", status, body)))
        }
    }
}

#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<NotificationMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    fn identifier(&self) -> &str {
        "memory"
    }

    async fn publish(&self, message: &NotificationMessage) -> Result<()> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}
