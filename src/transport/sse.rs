//! Server-sent-events decoding for half-duplex HTTP streaming.
//!
//! The service emits blocks like:
//!
//! ```text
//! id:1
//! event:result
//! :HTTP_STATUS/200
//! data:{"output":{...},"usage":{...},"request_id":"..."}
//! ```
//!
//! separated by a blank line. Framing and UTF-8 reassembly are left to
//! `eventsource-stream`; the `:HTTP_STATUS/` comment is dropped there, so the
//! status of an error block comes from its JSON body when present.

use crate::error::{ApiError, Error, Result};
use crate::protocol::ServiceResult;
use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{BoxStream, unfold};
use futures::{Stream, StreamExt};
use serde_json::Value;

const ERROR_EVENT: &str = "error";

/// One decoded SSE block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl From<Event> for SseEvent {
    fn from(event: Event) -> Self {
        let non_empty = |value: String| (!value.is_empty()).then_some(value);
        Self {
            id: non_empty(event.id),
            event: non_empty(event.event),
            data: event.data,
        }
    }
}

impl SseEvent {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some(ERROR_EVENT)
    }

    /// Convert into a result, or into an `Api` error for error blocks.
    ///
    /// # Errors
    /// Returns `Api` for error blocks and `Serialization` for non-JSON data.
    #[allow(clippy::result_large_err)]
    pub fn into_result(self) -> Result<ServiceResult> {
        if self.is_error() {
            let err = serde_json::from_str::<ApiError>(&self.data).unwrap_or_else(|_| ApiError {
                message: self.data.clone(),
                ..ApiError::default()
            });
            return Err(Error::Api(err));
        }
        let value: Value = serde_json::from_str(&self.data)?;
        let mut result = ServiceResult::from_envelope(value, None);
        result.event = self.event;
        Ok(result)
    }
}

fn stream_error(err: EventStreamError<reqwest::Error>) -> Error {
    match err {
        EventStreamError::Transport(err) => Error::Http(err),
        other => Error::EventStream(other.to_string()),
    }
}

/// Decode a byte stream into results. Blocks without data are skipped, and
/// the stream ends after the first error.
pub fn result_stream<S>(bytes_stream: S) -> BoxStream<'static, Result<ServiceResult>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let events = bytes_stream.eventsource().boxed();
    unfold((events, false), |(mut events, done)| async move {
        if done {
            return None;
        }
        loop {
            let item = match events.next().await? {
                Ok(event) if event.data.is_empty() => continue,
                Ok(event) => SseEvent::from(event).into_result(),
                Err(err) => Err(stream_error(err)),
            };
            let done = item.is_err();
            return Some((item, (events, done)));
        }
    })
    .boxed()
}
