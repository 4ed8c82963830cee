use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::task::TaskStatus;

/// Usage counters reported alongside a result. Fields vary by service, so the
/// common ones are typed and everything else is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
}

/// One inbound message from the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResult {
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    /// Discriminator of the inbound frame (`result-generated`, `response.audio.delta`, ...).
    pub event: Option<String>,
    pub status_code: Option<u16>,
    pub payload: Payload,
    pub usage: Option<Usage>,
}

/// The `{"request_id", "output", "usage"}` response envelope.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    usage: Option<Usage>,
}

impl ServiceResult {
    #[must_use]
    pub const fn binary(bytes: Bytes) -> Self {
        Self {
            request_id: None,
            session_id: None,
            event: None,
            status_code: None,
            payload: Payload::Binary(bytes),
            usage: None,
        }
    }

    #[must_use]
    pub const fn json(value: Value) -> Self {
        Self {
            request_id: None,
            session_id: None,
            event: None,
            status_code: None,
            payload: Payload::Json(value),
            usage: None,
        }
    }

    /// Build from a response envelope; only `output` becomes the payload.
    /// Malformed envelopes are kept whole rather than rejected.
    #[must_use]
    pub fn from_envelope(value: Value, status_code: Option<u16>) -> Self {
        match serde_json::from_value::<ResponseEnvelope>(value.clone()) {
            Ok(envelope) => Self {
                request_id: envelope.request_id,
                session_id: None,
                event: None,
                status_code,
                payload: Payload::Json(envelope.output),
                usage: envelope.usage,
            },
            Err(err) => {
                tracing::debug!("Response is not a standard envelope: {err}");
                Self {
                    status_code,
                    ..Self::json(value)
                }
            }
        }
    }

    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }

    #[must_use]
    pub const fn bytes(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Binary(bytes) => Some(bytes),
            Payload::Json(_) => None,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.output()?.get("task_id")?.as_str()
    }

    /// Status of an async task result; `Unknown` when the field is missing.
    #[must_use]
    pub fn task_status(&self) -> TaskStatus {
        self.output()
            .and_then(|output| output.get("task_status"))
            .and_then(Value::as_str)
            .map_or(TaskStatus::Unknown, TaskStatus::parse)
    }
}
