//! Speech synthesis: streamed text in, audio out, or one-shot text-to-audio.

use super::half_duplex::HalfDuplex;
use crate::error::{ApiError, Error, Result};
use crate::protocol::{ApiProtocol, Frame, ServiceRequest, ServiceRequestBuilder, ServiceResult};
use crate::session::{DuplexSession, SessionEvents, SessionState, TaskProtocol};
use bytes::Bytes;
use serde_json::json;
use std::time::Duration;

/// Synthesizes speech for text fed in pieces, over one duplex session, or
/// for a whole text at once.
#[derive(Debug)]
pub struct SpeechSynthesizer {
    half: HalfDuplex,
    request: ServiceRequest,
    session: DuplexSession<TaskProtocol>,
    events: SessionEvents,
}

impl SpeechSynthesizer {
    /// Request template for a synthesis model, e.g. `cosyvoice-v1` with voice
    /// `longxiaochun`. Add `format`, `sample_rate` and the like on the builder.
    #[must_use]
    pub fn request(model: impl Into<String>, voice: &str) -> ServiceRequestBuilder {
        ServiceRequest::builder(model)
            .endpoint("audio", "tts", "SpeechSynthesizer")
            .parameter("text_type", "PlainText")
            .parameter("voice", voice)
    }

    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn new(half: HalfDuplex, request: ServiceRequest) -> Result<Self> {
        let (session, events) =
            DuplexSession::new(half.connector(), half.config(), TaskProtocol, request.clone())?;
        Ok(Self {
            half,
            request,
            session,
            events,
        })
    }

    /// Queue one piece of text. Never waits on the network.
    ///
    /// # Errors
    /// Returns `SessionClosed` once streaming was completed or cancelled.
    #[allow(clippy::result_large_err)]
    pub fn streaming_call(&self, text: &str) -> Result<()> {
        self.session.send(Frame::Command(json!({ "text": text })))
    }

    /// End the text stream and wait until all audio has been produced.
    ///
    /// # Errors
    /// Returns `Timeout` if synthesis does not finish in time, or the failure
    /// that ended the session.
    pub async fn streaming_complete(&self, timeout: Duration) -> Result<()> {
        self.session.stop(timeout).await
    }

    pub fn async_streaming_complete(&self) {
        self.session.async_stop();
    }

    /// Abandon synthesis; audio not yet read is dropped.
    pub fn streaming_cancel(&self) {
        self.session.cancel();
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Next streamed result, audio or sentence metadata; `None` once
    /// synthesis completed or was cancelled.
    pub async fn next_result(&mut self) -> Option<Result<ServiceResult>> {
        self.events.next_result().await
    }

    /// Next chunk of audio, skipping metadata results.
    pub async fn next_audio(&mut self) -> Option<Result<Bytes>> {
        loop {
            match self.next_result().await? {
                Ok(result) => {
                    if let Some(bytes) = result.bytes() {
                        return Some(Ok(bytes.clone()));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// Synthesize a whole text in one WebSocket task and return the audio.
    ///
    /// # Errors
    /// Returns `Api` if the task fails or produces no audio.
    pub async fn call(&self, text: &str) -> Result<Bytes> {
        let mut request = self.request.clone();
        request.input = json!({ "text": text });
        request.protocol = ApiProtocol::WebSocket;
        let result = self.half.call(&request).await?;
        result.bytes().cloned().ok_or_else(|| {
            Error::Api(
                ApiError::new("NoAudio", "synthesis finished without audio")
                    .with_request_id(result.request_id.clone()),
            )
        })
    }
}
