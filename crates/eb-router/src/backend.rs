//! Backend client
//!
//! Issues resolved requests against the backend API and captures
//! `{status_code, status_text, headers, body}`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use eb_common::{BackendRequest, BackendResponse, BridgeError, HttpMethod, Result};
use tracing::{debug, error};

/// Anything that can perform a backend call
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn call(&self, request: &BackendRequest) -> Result<BackendResponse>;
}

/// HTTP backend configuration
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Backend base URL, e.g. `http://registry:8000`
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Option<Duration>,
    /// Header name and value attached to every call
    pub api_key: Option<(String, String)>,
}

impl HttpBackendConfig {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout,
            connect_timeout: None,
            api_key: None,
        }
    }
}

/// reqwest-based backend client
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(connect_timeout) = config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        let client = builder.build()?;

        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url_for(&self, request: &BackendRequest) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            request.path_and_query()
        )
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn call(&self, request: &BackendRequest) -> Result<BackendResponse> {
        let url = self.url_for(request);
        debug!(method = %request.method, url = %url, "Calling backend");

        let mut builder = self.client.request(to_reqwest_method(request.method), &url);
        if let Some((ref header, ref value)) = self.config.api_key {
            builder = builder.header(header.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            error!(url = %url, error = %e, "Backend request failed");
            if e.is_timeout() {
                BridgeError::backend(None, format!("request to {} timed out", url))
            } else {
                BridgeError::backend(None, e.to_string())
            }
        })?;

        let status = response.status();
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::backend(Some(status.as_u16()), e.to_string()))?;

        Ok(BackendResponse {
            status_code: status.as_u16(),
            status_text: status.canonical_reason().map(str::to_string),
            headers,
            body,
        })
    }
}
