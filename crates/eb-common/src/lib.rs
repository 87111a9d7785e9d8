use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Inbound Event Types
// ============================================================================

/// An event delivered by the event bus.
///
/// Accepts both the EventBridge envelope (`detail-type`) and the short
/// `type` key on input. When both are present `detail-type` wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawInboundEvent")]
pub struct InboundEvent {
    pub id: String,
    pub source: String,
    #[serde(rename = "detail-type")]
    pub event_type: String,
    pub detail: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawInboundEvent {
    #[serde(default = "new_event_id")]
    id: String,
    source: String,
    #[serde(rename = "detail-type", default)]
    detail_type: Option<String>,
    #[serde(rename = "type", default)]
    short_type: Option<String>,
    #[serde(default)]
    detail: serde_json::Value,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

impl TryFrom<RawInboundEvent> for InboundEvent {
    type Error = String;

    fn try_from(raw: RawInboundEvent) -> std::result::Result<Self, Self::Error> {
        let event_type = raw
            .detail_type
            .or(raw.short_type)
            .ok_or_else(|| "missing field `detail-type`".to_string())?;
        Ok(Self {
            id: raw.id,
            source: raw.source,
            event_type,
            detail: raw.detail,
            time: raw.time,
        })
    }
}

fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl InboundEvent {
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: new_event_id(),
            source: source.into(),
            event_type: event_type.into(),
            detail,
            time: Some(Utc::now()),
        }
    }

    /// The JSON document that `$.`-prefixed references are resolved against.
    pub fn envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "source": self.source,
            "detail-type": self.event_type,
            "detail": self.detail,
        })
    }

    pub fn key(&self) -> RuleKey {
        RuleKey::new(&self.source, &self.event_type)
    }
}

// ============================================================================
// Dispatch Rule Types
// ============================================================================

/// Exact-match lookup key for a rule: `(event_source, event_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub event_source: String,
    pub event_type: String,
}

impl RuleKey {
    pub fn new(event_source: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            event_source: event_source.into(),
            event_type: event_type.into(),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_source, self.event_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(BridgeError::Config(format!("unsupported HTTP method: {}", other))),
        }
    }
}

/// Prefix marking a parameter value as derived from the event.
pub const DERIVED_PREFIX: &str = "$.";

/// A path or query parameter value: either a literal or a reference into the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamValue {
    Literal(String),
    /// Dotted path into the event envelope, without the `$.` prefix.
    Derived(String),
}

impl ParamValue {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(DERIVED_PREFIX) {
            Some(path) => ParamValue::Derived(path.to_string()),
            None => ParamValue::Literal(raw.to_string()),
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, ParamValue::Derived(_))
    }
}

impl From<String> for ParamValue {
    fn from(raw: String) -> Self {
        ParamValue::parse(&raw)
    }
}

impl From<&str> for ParamValue {
    fn from(raw: &str) -> Self {
        ParamValue::parse(raw)
    }
}

impl From<ParamValue> for String {
    fn from(value: ParamValue) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Literal(s) => f.write_str(s),
            ParamValue::Derived(path) => write!(f, "{}{}", DERIVED_PREFIX, path),
        }
    }
}

/// Binding from an event kind to a backend HTTP call shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRule {
    pub name: String,
    pub event_source: String,
    pub event_type: String,
    pub method: HttpMethod,
    pub path_template: String,
    #[serde(default)]
    pub query_mapping: IndexMap<String, ParamValue>,
    #[serde(default)]
    pub path_param_values: Vec<ParamValue>,
    /// Wrap the call in a notification workflow
    #[serde(default)]
    pub notify: bool,
}

impl DispatchRule {
    pub fn new(
        name: impl Into<String>,
        event_source: impl Into<String>,
        event_type: impl Into<String>,
        method: HttpMethod,
        path_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            event_source: event_source.into(),
            event_type: event_type.into(),
            method,
            path_template: path_template.into(),
            query_mapping: IndexMap::new(),
            path_param_values: Vec::new(),
            notify: false,
        }
    }

    pub fn with_query(mut self, param: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.query_mapping.insert(param.into(), value.into());
        self
    }

    pub fn with_path_params<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.path_param_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    pub fn key(&self) -> RuleKey {
        RuleKey::new(&self.event_source, &self.event_type)
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// What `register` does when a rule key is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail the second registration
    #[default]
    Reject,
    /// Overwrite the earlier rule
    Replace,
}

/// Immutable settings the rule registry is constructed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Source assigned to rules that do not name one
    pub event_source: String,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

impl RegistryConfig {
    pub fn new(event_source: impl Into<String>) -> Self {
        Self {
            event_source: event_source.into(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

// ============================================================================
// Backend Call Types
// ============================================================================

/// A fully resolved backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendRequest {
    pub method: HttpMethod,
    /// Path with placeholders substituted and percent-encoded
    pub path: String,
    /// Decoded query pairs in mapping order
    pub query: Vec<(String, String)>,
}

impl BackendRequest {
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }
}

/// Result of a backend call, as captured by the `CallBackend` stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    pub status_code: u16,
    pub status_text: Option<String>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

impl BackendResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

// ============================================================================
// Notification Types
// ============================================================================

/// Message published to the notification sink after a getter call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub date: String,
    pub response_body: String,
    pub status_code: u16,
    pub status_text: String,
}

/// Destination for workflow notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn identifier(&self) -> &str;

    async fn publish(&self, message: &NotificationMessage) -> Result<()>;
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Rule definition error: rule '{rule}' path template has {expected} placeholder(s) but {given} value(s) were given")]
    RuleDefinition {
        rule: String,
        expected: usize,
        given: usize,
    },

    #[error("Duplicate rule: '{name}' conflicts with an existing rule for {key}")]
    DuplicateRule { name: String, key: RuleKey },

    #[error("Duplicate rule name: '{name}'")]
    DuplicateRuleName { name: String },

    #[error("No rule found for {event_source}/{event_type}")]
    NotFound {
        event_source: String,
        event_type: String,
    },

    #[error("Missing path parameter {index} for rule '{rule}': {reference} not present in event")]
    MissingPathParameter {
        rule: String,
        index: usize,
        reference: String,
    },

    #[error("Backend call failed{}: {message}", status_suffix(.status))]
    BackendCallFailure { status: Option<u16>, message: String },

    #[error("Malformed result: missing {field}")]
    MalformedResult { field: String },

    #[error("Publish to {sink} failed: {message}")]
    PublishFailure { sink: String, message: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn not_found(key: &RuleKey) -> Self {
        Self::NotFound {
            event_source: key.event_source.clone(),
            event_type: key.event_type.clone(),
        }
    }

    pub fn backend(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::BackendCallFailure {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(field: impl Into<String>) -> Self {
        Self::MalformedResult { field: field.into() }
    }

    pub fn publish(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PublishFailure {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Whether bus redelivery could produce a different result
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::BackendCallFailure { .. }
                | BridgeError::PublishFailure { .. }
                | BridgeError::Cancelled
        )
    }

    /// Short stable label for metrics and API responses
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::RuleDefinition { .. } => "RuleDefinitionError",
            BridgeError::DuplicateRule { .. } => "DuplicateRule",
            BridgeError::DuplicateRuleName { .. } => "DuplicateRuleName",
            BridgeError::NotFound { .. } => "NotFound",
            BridgeError::MissingPathParameter { .. } => "MissingPathParameter",
            BridgeError::BackendCallFailure { .. } => "BackendCallFailure",
            BridgeError::MalformedResult { .. } => "MalformedResult",
            BridgeError::PublishFailure { .. } => "PublishFailure",
            BridgeError::Cancelled => "Cancelled",
            BridgeError::Config(_) => "ConfigError",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {}", s)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accepts_detail_type_and_type() {
        let a: InboundEvent = serde_json::from_str(
            r#"{"source":"quilt.pkg","detail-type":"GetHealth","detail":{}}"#,
        )
        .unwrap();
        let b: InboundEvent =
            serde_json::from_str(r#"{"source":"quilt.pkg","type":"GetHealth"}"#).unwrap();

        assert_eq!(a.event_type, "GetHealth");
        assert_eq!(b.event_type, "GetHealth");
        assert!(b.detail.is_null());
        assert!(!b.id.is_empty());
    }

    #[test]
    fn test_event_with_both_type_keys_prefers_detail_type() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"source":"quilt.pkg","type":"Short","detail-type":"GetHealth"}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, "GetHealth");

        let err = serde_json::from_str::<InboundEvent>(r#"{"source":"quilt.pkg"}"#).unwrap_err();
        assert!(err.to_string().contains("detail-type"));
    }

    #[test]
    fn test_event_serializes_detail_type() {
        let event = InboundEvent::new("quilt.pkg", "GetHealth", serde_json::json!({}));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["detail-type"], "GetHealth");
        let back: InboundEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_param_value_parse() {
        assert_eq!(
            ParamValue::parse("$.detail.bucket_name"),
            ParamValue::Derived("detail.bucket_name".to_string())
        );
        assert_eq!(
            ParamValue::parse("my-bucket"),
            ParamValue::Literal("my-bucket".to_string())
        );
        assert_eq!(ParamValue::parse("$.detail.x").to_string(), "$.detail.x");
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("FETCH".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_query_string_encoding() {
        let request = BackendRequest {
            method: HttpMethod::Post,
            path: "/registries/b1/packages".to_string(),
            query: vec![
                ("s3_folder".to_string(), "f1".to_string()),
                ("metadata".to_string(), r#"{"a":1}"#.to_string()),
            ],
        };

        assert_eq!(
            request.path_and_query(),
            "/registries/b1/packages?s3_folder=f1&metadata=%7B%22a%22%3A1%7D"
        );
    }

    #[test]
    fn test_response_header_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("date".to_string(), vec!["Tue, 01 Oct 2024 10:00:00 GMT".to_string()]);
        let response = BackendResponse {
            status_code: 204,
            status_text: Some("No Content".to_string()),
            headers,
            body: String::new(),
        };

        assert!(response.is_success());
        assert_eq!(response.header("Date"), Some("Tue, 01 Oct 2024 10:00:00 GMT"));
        assert_eq!(response.header("etag"), None);
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::RuleDefinition {
            rule: "create".to_string(),
            expected: 1,
            given: 0,
        };
        assert!(err.to_string().contains("1 placeholder(s) but 0 value(s)"));
        assert!(!err.is_retryable());
        assert!(BridgeError::backend(Some(503), "unavailable").is_retryable());
        assert_eq!(
            BridgeError::backend(Some(503), "unavailable").to_string(),
            "Backend call failed with status 503: unavailable"
        );
    }
}
