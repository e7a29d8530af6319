//! Local reply options and the canonical error body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::host::HostStatus;

/// Response code details used when the caller sets none.
pub const DEFAULT_RESPONSE_CODE_DETAILS: &str = "goext_local_reply";

/// Options for [`FilterContext::json`](crate::FilterContext::json) and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReplyOptions {
    pub response_code_details: Option<String>,
    /// -1 when no gRPC status applies.
    pub grpc_status: i64,
    /// Status the context reports once the reply is sent.
    pub status: HostStatus,
    pub headers: Vec<(String, String)>,
}

impl Default for LocalReplyOptions {
    fn default() -> Self {
        Self {
            response_code_details: None,
            grpc_status: -1,
            status: HostStatus::LocalReply,
            headers: Vec::new(),
        }
    }
}

impl LocalReplyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.response_code_details = Some(details.into());
        self
    }

    pub fn with_grpc_status(mut self, status: i64) -> Self {
        self.grpc_status = status;
        self
    }

    pub fn with_status(mut self, status: HostStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub(crate) fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub(crate) fn details(&self) -> String {
        self.response_code_details
            .clone()
            .unwrap_or_else(|| DEFAULT_RESPONSE_CODE_DETAILS.to_string())
    }
}

/// JSON body of error replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub server_time: i64,
}

impl ErrorBody {
    /// Body for `status`, stamped with the current time.
    pub fn new(code: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            message: reason_phrase(status).to_string(),
            errors: Vec::new(),
            data: Map::new(),
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }
}

/// Canonical reason phrase, including the non-standard 499.
pub fn reason_phrase(status: u16) -> &'static str {
    if status == 499 {
        return "Client Closed Request";
    }
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Replace whitespace and control characters so `message` fits in a
/// response-code-details token.
pub fn sanitize_details(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_whitespace() || c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = LocalReplyOptions::default();
        assert_eq!(options.grpc_status, -1);
        assert_eq!(options.status, HostStatus::LocalReply);
        assert_eq!(options.details(), DEFAULT_RESPONSE_CODE_DETAILS);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let options = LocalReplyOptions::new().with_header("Content-Type", "text/html");
        assert!(options.has_header("content-type"));
        assert!(!options.has_header("content-length"));
    }

    #[test]
    fn error_body_shape() {
        let body = ErrorBody::new("UNAUTHORIZED", 401);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["code"], "UNAUTHORIZED");
        assert_eq!(value["message"], "Unauthorized");
        assert_eq!(value["errors"], serde_json::json!([]));
        assert_eq!(value["data"], serde_json::json!({}));
        assert!(value["serverTime"].as_i64().unwrap() > 0);
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(reason_phrase(403), "Forbidden");
        assert_eq!(reason_phrase(499), "Client Closed Request");
        assert_eq!(reason_phrase(502), "Bad Gateway");
    }

    #[test]
    fn details_are_sanitized() {
        assert_eq!(sanitize_details("bad token\nretry later"), "bad_token_retry_later");
        assert_eq!(sanitize_details("a\tb\u{7}c"), "a_b_c");
    }
}
