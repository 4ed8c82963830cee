use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error body reported by the platform, either in an HTTP error envelope, an
/// SSE `event:error` block, or a duplex `task-failed` / `error` frame.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            code: Some(code.into()),
            message: message.into(),
            request_id: None,
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status_code {
            write!(f, "[{status}] ")?;
        }
        if let Some(code) = &self.code {
            write!(f, "{code}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(request_id) = &self.request_id {
            write!(f, " (request_id: {request_id})")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Required input missing: {0}")]
    InputRequired(String),

    #[error("No API key provided; set DASHSCOPE_API_KEY or configure one explicitly")]
    NoApiKey,

    #[error("DashScope API error: {0}")]
    Api(ApiError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed event stream: {0}")]
    EventStream(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Header name error: {0}")]
    HeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("The session no longer accepts frames")]
    SessionClosed,

    #[error("The session was cancelled")]
    Cancelled,
}

impl Error {
    /// Transient failures are retried by the task poller without consuming a
    /// backoff step.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Api(ApiError { status_code: Some(503 | 504), .. }))
    }

    /// A cloneable description of this error, suitable for handing to every
    /// waiter on a completion gate.
    #[must_use]
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Api(err) => err.clone(),
            other => ApiError::new(other.kind(), other.to_string()),
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::InputRequired(_) => "InputRequired",
            Self::NoApiKey => "NoApiKey",
            Self::Api(_) => "ApiError",
            Self::Timeout(_) => "Timeout",
            Self::WebSocket(_) | Self::ConnectionClosed => "ConnectionError",
            Self::Http(_) => "HttpError",
            Self::Serialization(_) | Self::EventStream(_) => "MalformedEnvelope",
            Self::Url(_) | Self::Header(_) | Self::HeaderName(_) => "InvalidRequest",
            Self::SessionClosed => "SessionClosed",
            Self::Cancelled => "Cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_503_and_504_are_transient() {
        for status in [503, 504] {
            let err = Error::Api(ApiError::new("Throttling", "busy").with_status(status));
            assert!(err.is_transient(), "{status} should be transient");
        }
        for status in [400, 429, 500, 502] {
            let err = Error::Api(ApiError::new("Err", "nope").with_status(status));
            assert!(!err.is_transient(), "{status} should not be transient");
        }
        assert!(!Error::ConnectionClosed.is_transient());
    }

    #[test]
    fn api_error_display_includes_request_id() {
        let err = ApiError::new("InvalidParameter", "bad model")
            .with_status(400)
            .with_request_id(Some("req-1".to_string()));
        assert_eq!(err.to_string(), "[400] InvalidParameter: bad model (request_id: req-1)");
    }

    #[test]
    fn transport_errors_convert_to_api_error() {
        let api = Error::ConnectionClosed.to_api_error();
        assert_eq!(api.code.as_deref(), Some("ConnectionError"));
        assert!(api.message.contains("closed"));
    }
}
