//! Notification formatting
//!
//! Builds the `{date, responseBody, statusCode, statusText}` message from a
//! `CallBackend` result. Nothing partial is ever produced.

use eb_common::{BackendResponse, BridgeError, NotificationMessage, Result};
use serde::{Deserialize, Serialize};

/// Which parts of the backend result the publish stage reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultBinding {
    /// Response header supplying the notification date
    pub date_header: String,
}

impl Default for ResultBinding {
    fn default() -> Self {
        Self {
            date_header: "date".to_string(),
        }
    }
}

pub fn format_notification(
    response: &BackendResponse,
    binding: &ResultBinding,
) -> Result<NotificationMessage> {
    let date = response
        .header(&binding.date_header)
        .ok_or_else(|| BridgeError::malformed(format!("headers.{}", binding.date_header)))?;
    let status_text = response
        .status_text
        .as_deref()
        .ok_or_else(|| BridgeError::malformed("statusText"))?;

    Ok(NotificationMessage {
        date: date.to_string(),
        response_body: response.body.clone(),
        status_code: response.status_code,
        status_text: status_text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn response(headers: &[(&str, &str)], status_text: Option<&str>) -> BackendResponse {
        let mut map = BTreeMap::new();
        for (k, v) in headers {
            map.insert(k.to_string(), vec![v.to_string()]);
        }
        BackendResponse {
            status_code: 200,
            status_text: status_text.map(str::to_string),
            headers: map,
            body: r#"{"ok":true}"#.to_string(),
        }
    }

    #[test]
    fn test_format_complete_result() {
        let resp = response(&[("Date", "Tue, 01 Oct 2024 10:00:00 GMT")], Some("OK"));
        let message = format_notification(&resp, &ResultBinding::default()).unwrap();

        assert_eq!(message.date, "Tue, 01 Oct 2024 10:00:00 GMT");
        assert_eq!(message.response_body, r#"{"ok":true}"#);
        assert_eq!(message.status_code, 200);
        assert_eq!(message.status_text, "OK");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["responseBody"], r#"{"ok":true}"#);
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["statusText"], "OK");
    }

    #[test]
    fn test_missing_date_is_malformed() {
        let resp = response(&[], Some("OK"));
        let err = format_notification(&resp, &ResultBinding::default()).unwrap_err();
        assert_eq!(err, BridgeError::malformed("headers.date"));
    }

    #[test]
    fn test_missing_status_text_is_malformed() {
        let resp = response(&[("date", "Tue, 01 Oct 2024 10:00:00 GMT")], None);
        let err = format_notification(&resp, &ResultBinding::default()).unwrap_err();
        assert_eq!(err, BridgeError::malformed("statusText"));
    }

    #[test]
    fn test_custom_date_header() {
        let resp = response(&[("x-generated-at", "2024-10-01T10:00:00Z")], Some("OK"));
        let binding = ResultBinding {
            date_header: "X-Generated-At".to_string(),
        };
        assert_eq!(
            format_notification(&resp, &binding).unwrap().date,
            "2024-10-01T10:00:00Z"
        );
    }
}
