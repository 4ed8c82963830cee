//! Request framing: turns a service request into its wire envelope.
//!
//! Framing is pure. It performs presence checks only; everything else is left
//! to the remote service.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// How the server streams a task over WebSocket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// One request, one accumulated response.
    #[default]
    None,
    /// One request, partial responses.
    Out,
    /// Streamed input, one response.
    In,
    /// Streamed input and output.
    Duplex,
}

/// Which transport carries a half-duplex call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApiProtocol {
    #[default]
    Http,
    WebSocket,
}

/// A service call: model, endpoint, input payload and parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRequest {
    pub model: String,
    pub task_group: String,
    pub task: String,
    pub function: String,
    pub input: Value,
    pub parameters: Map<String, Value>,
    pub resources: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub api_key: Option<String>,
    pub workspace: Option<String>,
    pub streaming: StreamingMode,
    pub protocol: ApiProtocol,
    pub is_async: bool,
}

impl ServiceRequest {
    #[must_use]
    pub fn builder(model: impl Into<String>) -> ServiceRequestBuilder {
        ServiceRequestBuilder::new(model)
    }

    /// Presence checks for the model name.
    ///
    /// # Errors
    /// Returns `InputRequired` naming the missing field.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        require("model", &self.model)
    }

    /// Presence checks for the model name and the endpoint triple used by the
    /// HTTP and task-envelope paths.
    ///
    /// # Errors
    /// Returns `InputRequired` naming the first missing field.
    #[allow(clippy::result_large_err)]
    pub fn validate_endpoint(&self) -> Result<()> {
        self.validate()?;
        require("task_group", &self.task_group)?;
        require("task", &self.task)?;
        require("function", &self.function)
    }

    /// Path below the HTTP base URL, e.g. `services/aigc/text-generation/generation`.
    #[must_use]
    pub fn service_path(&self) -> String {
        format!("services/{}/{}/{}", self.task_group, self.task, self.function)
    }

    /// Half-duplex HTTP body: `{"model", "input", "parameters"[, "resources"]}`.
    #[must_use]
    pub fn http_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "input": self.input_or_empty(),
            "parameters": self.parameters,
        });
        if let Some(resources) = &self.resources {
            body["resources"] = resources.clone();
        }
        body
    }

    /// The opening `run-task` envelope of a task-protocol WebSocket session.
    #[must_use]
    pub fn run_task_frame(&self, task_id: &str) -> Value {
        let mut payload = json!({
            "model": self.model,
            "task_group": self.task_group,
            "task": self.task,
            "function": self.function,
            "input": self.input_or_empty(),
            "parameters": self.parameters,
        });
        if let Some(resources) = &self.resources {
            payload["resources"] = resources.clone();
        }
        json!({
            "header": {
                "action": "run-task",
                "task_id": task_id,
                "streaming": self.streaming,
            },
            "payload": payload,
        })
    }

    fn input_or_empty(&self) -> Value {
        if self.input.is_null() {
            Value::Object(Map::new())
        } else {
            self.input.clone()
        }
    }
}

#[allow(clippy::result_large_err)]
fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InputRequired(format!("{name} is required")));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ServiceRequestBuilder {
    request: ServiceRequest,
}

impl ServiceRequestBuilder {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            request: ServiceRequest {
                model: model.into(),
                ..ServiceRequest::default()
            },
        }
    }

    /// Endpoint triple, e.g. `("aigc", "text-generation", "generation")`.
    #[must_use]
    pub fn endpoint(
        mut self,
        task_group: impl Into<String>,
        task: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        self.request.task_group = task_group.into();
        self.request.task = task.into();
        self.request.function = function.into();
        self
    }

    #[must_use]
    pub fn input(mut self, input: Value) -> Self {
        self.request.input = input;
        self
    }

    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.request.parameters.extend(parameters);
        self
    }

    #[must_use]
    pub fn resources(mut self, resources: Value) -> Self {
        self.request.resources = Some(resources);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.request.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.request.workspace = Some(workspace.into());
        self
    }

    #[must_use]
    pub const fn streaming(mut self, streaming: StreamingMode) -> Self {
        self.request.streaming = streaming;
        self
    }

    #[must_use]
    pub const fn protocol(mut self, protocol: ApiProtocol) -> Self {
        self.request.protocol = protocol;
        self
    }

    #[must_use]
    pub const fn is_async(mut self, is_async: bool) -> Self {
        self.request.is_async = is_async;
        self
    }

    #[must_use]
    pub fn build(self) -> ServiceRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asr_request() -> ServiceRequest {
        ServiceRequest::builder("paraformer-realtime-v2")
            .endpoint("audio", "asr", "recognition")
            .parameter("format", "pcm")
            .parameter("sample_rate", 16000)
            .streaming(StreamingMode::Duplex)
            .build()
    }

    #[test]
    fn empty_model_is_input_required() {
        let err = ServiceRequest::builder(" ").build().validate().unwrap_err();
        assert!(matches!(err, Error::InputRequired(ref field) if field.contains("model")));
    }

    #[test]
    fn missing_endpoint_part_is_named() {
        let request = ServiceRequest::builder("qwen-turbo").endpoint("aigc", "", "generation").build();
        let err = request.validate_endpoint().unwrap_err();
        assert!(matches!(err, Error::InputRequired(ref field) if field.starts_with("task ")));
    }

    #[test]
    fn http_body_has_model_input_parameters() {
        let request = ServiceRequest::builder("qwen-turbo")
            .endpoint("aigc", "text-generation", "generation")
            .input(json!({"prompt": "hi"}))
            .parameter("seed", 7)
            .build();
        assert_eq!(
            request.http_body(),
            json!({"model": "qwen-turbo", "input": {"prompt": "hi"}, "parameters": {"seed": 7}})
        );
        assert_eq!(request.service_path(), "services/aigc/text-generation/generation");
    }

    #[test]
    fn run_task_frame_carries_the_same_fields() {
        let frame = asr_request().run_task_frame("task-1");
        assert_eq!(frame["header"]["action"], "run-task");
        assert_eq!(frame["header"]["task_id"], "task-1");
        assert_eq!(frame["header"]["streaming"], "duplex");
        assert_eq!(frame["payload"]["model"], "paraformer-realtime-v2");
        assert_eq!(frame["payload"]["task"], "asr");
        assert_eq!(frame["payload"]["input"], json!({}));
        assert_eq!(frame["payload"]["parameters"]["sample_rate"], 16000);
        assert!(frame["payload"].get("resources").is_none());
    }
}
