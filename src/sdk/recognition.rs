//! Real-time speech recognition over a task-protocol duplex session.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::protocol::{Frame, ServiceRequest, ServiceRequestBuilder, ServiceResult, Usage};
use crate::session::{DuplexSession, SessionEvents, SessionState, TaskProtocol};
use crate::transport::Connector;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One recognized sentence, possibly still in progress.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Sentence {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub begin_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub sentence_end: Option<bool>,
    #[serde(default)]
    pub words: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub request_id: Option<String>,
    pub sentence: Option<Sentence>,
    pub usage: Option<Usage>,
    pub raw: ServiceResult,
}

impl RecognitionResult {
    #[must_use]
    pub fn from_result(raw: ServiceResult) -> Self {
        let sentence = raw
            .output()
            .and_then(|output| output.get("sentence"))
            .cloned()
            .and_then(|sentence| serde_json::from_value::<Sentence>(sentence).ok());
        Self {
            request_id: raw.request_id.clone(),
            sentence,
            usage: raw.usage.clone(),
            raw,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.sentence.as_ref().map(|sentence| sentence.text.as_str())
    }

    /// Whether this result closes a sentence. Older models omit the flag and
    /// only set `end_time` on the final result of a sentence.
    #[must_use]
    pub fn is_sentence_end(&self) -> bool {
        self.sentence.as_ref().is_some_and(|sentence| {
            sentence.sentence_end.unwrap_or(sentence.end_time.is_some())
        })
    }
}

/// Streams audio in and recognized sentences out.
#[derive(Debug)]
pub struct Recognition {
    session: DuplexSession<TaskProtocol>,
    events: SessionEvents,
}

impl Recognition {
    /// Request template for a recognition model, e.g. `paraformer-realtime-v2`
    /// with format `pcm` at 16000 Hz. Add further parameters on the builder.
    #[must_use]
    pub fn request(model: impl Into<String>, format: &str, sample_rate: u32) -> ServiceRequestBuilder {
        ServiceRequest::builder(model)
            .endpoint("audio", "asr", "recognition")
            .parameter("format", format)
            .parameter("sample_rate", sample_rate)
    }

    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn new(connector: Arc<dyn Connector>, config: &ClientConfig, request: ServiceRequest) -> Result<Self> {
        let (session, events) = DuplexSession::new(connector, config, TaskProtocol, request)?;
        Ok(Self { session, events })
    }

    /// Open the connection ahead of the first audio frame.
    ///
    /// # Errors
    /// Returns `SessionClosed` if recognition already ended.
    #[allow(clippy::result_large_err)]
    pub fn start(&self) -> Result<()> {
        self.session.start()
    }

    /// Queue one chunk of encoded audio. Never waits on the network.
    ///
    /// # Errors
    /// Returns `SessionClosed` after `stop`, `async_stop` or `cancel`.
    #[allow(clippy::result_large_err)]
    pub fn send_audio_frame(&self, audio: impl Into<Bytes>) -> Result<()> {
        self.session.send(Frame::Binary(audio.into()))
    }

    /// Finish the audio stream and wait for the final result.
    ///
    /// # Errors
    /// Returns `Timeout` if the service does not finish in time, or the
    /// failure that ended the session.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.session.stop(timeout).await
    }

    pub fn async_stop(&self) {
        self.session.async_stop();
    }

    pub fn cancel(&self) {
        self.session.cancel();
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    #[must_use]
    pub fn request_id(&self) -> Option<String> {
        self.session.request_id()
    }

    /// A handle for feeding audio from another task.
    #[must_use]
    pub fn session(&self) -> DuplexSession<TaskProtocol> {
        self.session.clone()
    }

    /// Next recognition result; `None` once recognition completed or was
    /// cancelled.
    pub async fn next_result(&mut self) -> Option<Result<RecognitionResult>> {
        Some(self.events.next_result().await?.map(RecognitionResult::from_result))
    }
}
