//! Standardized API error envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error body returned for every non-2xx response.
///
/// `error` is the HTTP status phrase; `message` is human-readable and must
/// never carry secrets, SQL, or provider internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorBody {
    pub fn new(status_phrase: impl Into<String>) -> Self {
        Self {
            error: status_phrase.into(),
            message: None,
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omits_absent_fields() {
        let body = ErrorBody::new("Too Many Requests");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "Too Many Requests");
        assert!(json.get("message").is_none());
        assert!(json.get("request_id").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn carries_message_and_request_id() {
        let body = ErrorBody::new("Unauthorized")
            .with_message("missing API key")
            .with_request_id("req-1");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["message"], "missing API key");
        assert_eq!(json["request_id"], "req-1");
    }
}
