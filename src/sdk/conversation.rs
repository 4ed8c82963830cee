//! Conversational multimodal sessions on the realtime protocol.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::protocol::events::realtime;
use crate::protocol::{Frame, ServiceRequest, ServiceResult};
use crate::session::{DuplexSession, RealtimeProtocol, SessionEvents, SessionState};
use crate::transport::Connector;
use base64::Engine as _;
use base64::engine::general_purpose;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// A realtime conversation: audio and video frames in, transcripts, audio
/// deltas and response events out.
///
/// Every event the server sends is delivered as a [`ServiceResult`] carrying
/// the raw message; `result.event` holds its `type`.
#[derive(Debug)]
pub struct Conversation {
    session: DuplexSession<RealtimeProtocol>,
    events: SessionEvents,
}

impl Conversation {
    /// `parameters`, when non-empty, are sent as the opening `session.update`.
    ///
    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn new(
        connector: Arc<dyn Connector>,
        config: &ClientConfig,
        model: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<Self> {
        let request = ServiceRequest::builder(model).parameters(parameters).build();
        Self::from_request(connector, config, request)
    }

    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn from_request(connector: Arc<dyn Connector>, config: &ClientConfig, request: ServiceRequest) -> Result<Self> {
        let (session, events) = DuplexSession::new(connector, config, RealtimeProtocol, request)?;
        Ok(Self { session, events })
    }

    /// Server-assigned id, available after `session.created`.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session.session_id()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    #[allow(clippy::result_large_err)]
    fn send_command(&self, kind: &str, field: Option<(&str, Value)>) -> Result<()> {
        let mut command = RealtimeProtocol::command(kind);
        if let Some((key, value)) = field {
            command[key] = value;
        }
        self.session.send(Frame::Command(command))
    }

    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn update_session(&self, session: Map<String, Value>) -> Result<()> {
        self.send_command(realtime::SESSION_UPDATE, Some(("session", Value::Object(session))))
    }

    /// Append raw audio to the input buffer. Empty chunks are ignored.
    ///
    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn append_audio(&self, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }
        let encoded = general_purpose::STANDARD.encode(audio);
        self.send_command(realtime::INPUT_AUDIO_BUFFER_APPEND, Some(("audio", Value::String(encoded))))
    }

    /// Append one encoded video frame (e.g. a JPEG image).
    ///
    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn append_video(&self, image: &[u8]) -> Result<()> {
        if image.is_empty() {
            return Ok(());
        }
        let encoded = general_purpose::STANDARD.encode(image);
        self.send_command(realtime::INPUT_IMAGE_BUFFER_APPEND, Some(("image", Value::String(encoded))))
    }

    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn commit(&self) -> Result<()> {
        self.send_command(realtime::INPUT_AUDIO_BUFFER_COMMIT, None)
    }

    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn clear_audio(&self) -> Result<()> {
        self.send_command(realtime::INPUT_AUDIO_BUFFER_CLEAR, None)
    }

    /// Ask the model to respond, optionally with per-response settings.
    ///
    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn create_response(&self, response: Option<Map<String, Value>>) -> Result<()> {
        self.send_command(realtime::RESPONSE_CREATE, response.map(|r| ("response", Value::Object(r))))
    }

    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn cancel_response(&self) -> Result<()> {
        self.send_command(realtime::RESPONSE_CANCEL, None)
    }

    /// Send an arbitrary command; an `event_id` is added if missing.
    ///
    /// # Errors
    /// Returns `SessionClosed` once the session ended.
    #[allow(clippy::result_large_err)]
    pub fn send_raw(&self, command: Value) -> Result<()> {
        self.session.send(Frame::Command(command))
    }

    /// Send `session.finish` and wait for the server to close the session.
    ///
    /// # Errors
    /// Returns `Timeout` if the server does not finish in time, or the failure
    /// that ended the session.
    pub async fn end_session(&self, timeout: Duration) -> Result<()> {
        self.session.stop(timeout).await
    }

    pub fn end_session_async(&self) {
        self.session.async_stop();
    }

    pub fn cancel(&self) {
        self.session.cancel();
    }

    /// Next server event; `None` once the session completed or was cancelled.
    pub async fn next_event(&mut self) -> Option<Result<ServiceResult>> {
        self.events.next_result().await
    }
}
