//! The two production shapes of the duplex engine. They differ only in how
//! caller frames are shaped for the wire and how inbound events are named.

use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::protocol::events::{EventKind, EventTable, realtime, task};
use crate::protocol::{Frame, ServiceRequest, ServiceResult, StreamingMode, Usage, WireFrame};
use serde_json::{Value, json};
use std::sync::LazyLock;
use url::Url;

/// Frame shaping plus event discrimination for one wire dialect.
pub trait DuplexProtocol: Send + Sync + 'static {
    /// WebSocket URL for the request.
    ///
    /// # Errors
    /// Returns an error if required request fields are missing or the URL is invalid.
    #[allow(clippy::result_large_err)]
    fn endpoint(&self, config: &ClientConfig, request: &ServiceRequest) -> Result<String>;

    /// The envelope sent right after the socket opens, if any.
    ///
    /// # Errors
    /// Returns an error if the envelope cannot be serialized.
    #[allow(clippy::result_large_err)]
    fn start_frame(&self, request: &ServiceRequest, task_id: &str) -> Result<Option<WireFrame>>;

    /// Whether the outbound channel stays closed until a [`EventKind::Started`] event.
    fn awaits_start_ack(&self) -> bool;

    /// Map one caller frame to one wire frame.
    ///
    /// # Errors
    /// Returns an error if the frame cannot be serialized.
    #[allow(clippy::result_large_err)]
    fn shape(&self, frame: Frame, task_id: &str) -> Result<WireFrame>;

    fn event_table(&self) -> &EventTable;

    fn event_name<'a>(&self, message: &'a Value) -> Option<&'a str>;

    fn session_id(&self, message: &Value) -> Option<String>;

    fn request_id(&self, message: &Value) -> Option<String>;

    /// Whether a terminal event carries output worth delivering.
    fn has_output(&self, message: &Value) -> bool;

    /// The caller-facing result for an inbound JSON message.
    fn to_result(&self, message: Value) -> ServiceResult;

    fn to_error(&self, message: &Value) -> ApiError;

    fn classify(&self, message: &Value) -> EventKind {
        self.event_table().classify(self.event_name(message))
    }
}

#[allow(clippy::result_large_err)]
fn text_frame(value: &Value) -> Result<WireFrame> {
    Ok(WireFrame::Text(serde_json::to_string(value)?))
}

static TASK_EVENTS: LazyLock<EventTable> = LazyLock::new(|| {
    EventTable::new(&[
        (task::TASK_STARTED, EventKind::Started),
        (task::RESULT_GENERATED, EventKind::Data),
        (task::TASK_FINISHED, EventKind::Finished),
        (task::TASK_FAILED, EventKind::Failed),
    ])
});

/// Task envelope: `run-task` / `continue-task` / `finish-task` headers with a
/// payload, used by speech recognition and synthesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskProtocol;

impl TaskProtocol {
    fn action_frame(action: &str, task_id: &str, input: Value) -> Value {
        json!({
            "header": {
                "action": action,
                "task_id": task_id,
                "streaming": StreamingMode::Duplex,
            },
            "payload": { "input": input },
        })
    }
}

impl DuplexProtocol for TaskProtocol {
    fn endpoint(&self, config: &ClientConfig, request: &ServiceRequest) -> Result<String> {
        request.validate_endpoint()?;
        Ok(Url::parse(&config.websocket_base_url)?.to_string())
    }

    fn start_frame(&self, request: &ServiceRequest, task_id: &str) -> Result<Option<WireFrame>> {
        let mut frame = request.run_task_frame(task_id);
        frame["header"]["streaming"] = json!(StreamingMode::Duplex);
        text_frame(&frame).map(Some)
    }

    fn awaits_start_ack(&self) -> bool {
        true
    }

    fn shape(&self, frame: Frame, task_id: &str) -> Result<WireFrame> {
        match frame {
            Frame::Command(input) => text_frame(&Self::action_frame(task::CONTINUE_TASK, task_id, input)),
            Frame::Binary(bytes) => Ok(WireFrame::Binary(bytes)),
            Frame::Stop => text_frame(&Self::action_frame(task::FINISH_TASK, task_id, json!({}))),
        }
    }

    fn event_table(&self) -> &EventTable {
        &TASK_EVENTS
    }

    fn event_name<'a>(&self, message: &'a Value) -> Option<&'a str> {
        message.get("header")?.get("event")?.as_str()
    }

    fn session_id(&self, _message: &Value) -> Option<String> {
        None
    }

    fn request_id(&self, message: &Value) -> Option<String> {
        message.get("header")?.get("task_id")?.as_str().map(str::to_owned)
    }

    fn has_output(&self, message: &Value) -> bool {
        message
            .get("payload")
            .and_then(|payload| payload.get("output"))
            .is_some_and(|output| match output {
                Value::Null => false,
                Value::Object(map) => !map.is_empty(),
                _ => true,
            })
    }

    fn to_result(&self, message: Value) -> ServiceResult {
        let request_id = self.request_id(&message);
        let event = self.event_name(&message).map(str::to_owned);
        let mut payload = message.get("payload").cloned().unwrap_or(Value::Null);
        let usage = payload
            .get_mut("usage")
            .map(Value::take)
            .and_then(|usage| serde_json::from_value::<Usage>(usage).ok());
        let output = payload.get_mut("output").map(Value::take).unwrap_or(Value::Null);
        let mut result = ServiceResult::json(output)
            .with_request_id(request_id)
            .with_usage(usage);
        result.event = event;
        result
    }

    fn to_error(&self, message: &Value) -> ApiError {
        let header = message.get("header");
        let field = |name: &str| {
            header
                .and_then(|header| header.get(name))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        ApiError {
            status_code: None,
            code: field("error_code"),
            message: field("error_message").unwrap_or_else(|| "task failed".to_string()),
            request_id: field("task_id"),
        }
    }
}

static REALTIME_EVENTS: LazyLock<EventTable> = LazyLock::new(|| {
    EventTable::new(&[
        (realtime::SESSION_CREATED, EventKind::SessionCreated),
        (realtime::SESSION_FINISHED, EventKind::Finished),
        (realtime::RESPONSE_DONE, EventKind::TurnDone),
        (realtime::ERROR, EventKind::Failed),
    ])
});

/// Realtime envelope: `{"event_id", "type", ...}` commands, used by
/// conversational multimodal sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealtimeProtocol;

impl RealtimeProtocol {
    #[must_use]
    pub fn event_id() -> String {
        format!("event_{}", uuid::Uuid::new_v4().simple())
    }

    #[must_use]
    pub fn command(kind: &str) -> Value {
        json!({ "event_id": Self::event_id(), "type": kind })
    }
}

impl DuplexProtocol for RealtimeProtocol {
    fn endpoint(&self, config: &ClientConfig, request: &ServiceRequest) -> Result<String> {
        request.validate()?;
        let mut url = Url::parse(&config.realtime_base_url)?;
        url.query_pairs_mut().append_pair("model", &request.model);
        Ok(url.to_string())
    }

    fn start_frame(&self, request: &ServiceRequest, _task_id: &str) -> Result<Option<WireFrame>> {
        if request.parameters.is_empty() {
            return Ok(None);
        }
        let mut update = Self::command(realtime::SESSION_UPDATE);
        update["session"] = Value::Object(request.parameters.clone());
        text_frame(&update).map(Some)
    }

    fn awaits_start_ack(&self) -> bool {
        false
    }

    fn shape(&self, frame: Frame, _task_id: &str) -> Result<WireFrame> {
        match frame {
            Frame::Command(mut command) => {
                if let Some(map) = command.as_object_mut() {
                    map.entry("event_id").or_insert_with(|| Value::String(Self::event_id()));
                }
                text_frame(&command)
            }
            Frame::Binary(bytes) => Ok(WireFrame::Binary(bytes)),
            Frame::Stop => text_frame(&Self::command(realtime::SESSION_FINISH)),
        }
    }

    fn event_table(&self) -> &EventTable {
        &REALTIME_EVENTS
    }

    fn event_name<'a>(&self, message: &'a Value) -> Option<&'a str> {
        message.get("type")?.as_str()
    }

    fn session_id(&self, message: &Value) -> Option<String> {
        message.get("session")?.get("id")?.as_str().map(str::to_owned)
    }

    fn request_id(&self, _message: &Value) -> Option<String> {
        None
    }

    fn has_output(&self, _message: &Value) -> bool {
        true
    }

    fn to_result(&self, message: Value) -> ServiceResult {
        let event = self.event_name(&message).map(str::to_owned);
        let usage = message
            .get("response")
            .and_then(|response| response.get("usage"))
            .cloned()
            .and_then(|usage| serde_json::from_value::<Usage>(usage).ok());
        let mut result = ServiceResult::json(message).with_usage(usage);
        result.event = event;
        result
    }

    fn to_error(&self, message: &Value) -> ApiError {
        let error = message.get("error");
        let field = |name: &str| {
            error
                .and_then(|error| error.get(name))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        ApiError {
            status_code: None,
            code: field("code").or_else(|| field("type")),
            message: field("message").unwrap_or_else(|| "realtime session error".to_string()),
            request_id: message.get("event_id").and_then(Value::as_str).map(str::to_owned),
        }
    }
}
