//! Half-duplex calls: one request, then either one accumulated result or a
//! lazy stream of partial results.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    ApiProtocol, EventKind, Payload, ServiceRequest, ServiceResult, StreamingMode, WireFrame,
};
use crate::session::{DuplexProtocol, TaskProtocol};
use crate::transport::{Connection, Connector, RestClient};
use bytes::BytesMut;
use futures::stream::{BoxStream, unfold};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Runs half-duplex calls over HTTP or WebSocket, chosen per request by
/// [`ServiceRequest::protocol`].
#[derive(Clone)]
pub struct HalfDuplex {
    rest: RestClient,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for HalfDuplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalfDuplex").field("rest", &self.rest).finish_non_exhaustive()
    }
}

impl HalfDuplex {
    #[must_use]
    pub fn new(rest: RestClient, connector: Arc<dyn Connector>) -> Self {
        Self { rest, connector }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.rest.config()
    }

    #[must_use]
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    /// Send the request and wait for one terminal result.
    ///
    /// Over WebSocket the partial results are folded: binary payloads are
    /// concatenated, otherwise the last JSON output wins, and the last usage
    /// seen is kept.
    ///
    /// # Errors
    /// Returns `InputRequired`/`NoApiKey` before I/O, and `Api` (or the
    /// underlying transport error) for any failure after that.
    pub async fn call(&self, request: &ServiceRequest) -> Result<ServiceResult> {
        match request.protocol {
            ApiProtocol::Http => self.rest.call(request).await,
            ApiProtocol::WebSocket => {
                let results = self.open_task(request, StreamingMode::None).await?;
                fold_results(results).await
            }
        }
    }

    /// Send the request and yield each partial result as it arrives. The
    /// stream is single-pass; dropping it closes the connection.
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent. Later failures are
    /// yielded as the stream's last item.
    pub async fn stream_call(
        &self,
        request: &ServiceRequest,
    ) -> Result<BoxStream<'static, Result<ServiceResult>>> {
        match request.protocol {
            ApiProtocol::Http => self.rest.stream_call(request).await,
            ApiProtocol::WebSocket => self.open_task(request, StreamingMode::Out).await,
        }
    }

    async fn open_task(
        &self,
        request: &ServiceRequest,
        streaming: StreamingMode,
    ) -> Result<BoxStream<'static, Result<ServiceResult>>> {
        request.validate_endpoint()?;
        let config = self.rest.config();
        let headers = config.headers_for(request)?;
        let url = Url::parse(&config.websocket_base_url)?;

        let mut framed = request.clone();
        framed.streaming = streaming;
        let task_id = uuid::Uuid::new_v4().simple().to_string();
        let run_task = serde_json::to_string(&framed.run_task_frame(&task_id))?;

        let mut conn = self.connector.connect(url.as_str(), headers).await?;
        tracing::info!(model = %request.model, task_id = %task_id, "Half-duplex task connected");
        conn.send(WireFrame::Text(run_task)).await?;
        Ok(task_results(conn))
    }
}

async fn close_quietly(conn: &mut dyn Connection) {
    if let Err(err) = conn.close(1000, "finished").await {
        tracing::debug!("Close handshake failed: {err}");
    }
}

/// Read task events until `task-finished` or `task-failed`. Ends after the
/// first error.
fn task_results(conn: Box<dyn Connection>) -> BoxStream<'static, Result<ServiceResult>> {
    unfold((conn, false), |(mut conn, done)| async move {
        if done {
            close_quietly(conn.as_mut()).await;
            return None;
        }
        loop {
            let frame = match conn.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Some((Err(Error::ConnectionClosed), (conn, true))),
                Err(err) => return Some((Err(err), (conn, true))),
            };
            let message: Value = match frame {
                WireFrame::Binary(bytes) => {
                    return Some((Ok(ServiceResult::binary(bytes)), (conn, false)));
                }
                WireFrame::Text(text) => match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(err) => return Some((Err(err.into()), (conn, true))),
                },
            };
            match TaskProtocol.classify(&message) {
                EventKind::Started => {}
                EventKind::Finished => {
                    if TaskProtocol.has_output(&message) {
                        return Some((Ok(TaskProtocol.to_result(message)), (conn, true)));
                    }
                    close_quietly(conn.as_mut()).await;
                    return None;
                }
                EventKind::Failed => {
                    let err = TaskProtocol.to_error(&message);
                    return Some((Err(Error::Api(err)), (conn, true)));
                }
                EventKind::Data | EventKind::SessionCreated | EventKind::TurnDone => {
                    return Some((Ok(TaskProtocol.to_result(message)), (conn, false)));
                }
            }
        }
    })
    .boxed()
}

/// Fold partial results into one. Binary payloads take precedence and are
/// concatenated in arrival order.
///
/// # Errors
/// Returns the first error the stream yields.
pub async fn fold_results<S>(mut results: S) -> Result<ServiceResult>
where
    S: Stream<Item = Result<ServiceResult>> + Unpin,
{
    let mut audio = BytesMut::new();
    let mut last_json: Option<ServiceResult> = None;
    let mut usage = None;
    let mut request_id = None;
    while let Some(result) = results.next().await {
        let result = result?;
        if result.usage.is_some() {
            usage.clone_from(&result.usage);
        }
        if result.request_id.is_some() {
            request_id.clone_from(&result.request_id);
        }
        match &result.payload {
            Payload::Binary(bytes) => audio.extend_from_slice(bytes),
            Payload::Json(_) => last_json = Some(result),
        }
    }
    let folded = if audio.is_empty() {
        last_json.unwrap_or_else(|| ServiceResult::json(Value::Null))
    } else {
        let mut folded = ServiceResult::binary(audio.freeze());
        folded.event = last_json.and_then(|result| result.event);
        folded
    };
    Ok(folded.with_request_id(request_id).with_usage(usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Usage;
    use bytes::Bytes;
    use serde_json::json;

    fn usage(characters: u64) -> Usage {
        Usage {
            characters: Some(characters),
            ..Usage::default()
        }
    }

    #[tokio::test]
    async fn binary_payloads_are_concatenated() {
        let parts = vec![
            Ok(ServiceResult::binary(Bytes::from_static(b"ab"))),
            Ok(ServiceResult::json(json!({"sentence": {"index": 0}}))
                .with_request_id(Some("t-1".into()))
                .with_usage(Some(usage(4)))),
            Ok(ServiceResult::binary(Bytes::from_static(b"cd"))),
        ];
        let folded = fold_results(futures::stream::iter(parts)).await.unwrap();
        assert_eq!(folded.bytes().unwrap().as_ref(), b"abcd");
        assert_eq!(folded.request_id.as_deref(), Some("t-1"));
        assert_eq!(folded.usage.unwrap().characters, Some(4));
    }

    #[tokio::test]
    async fn last_json_and_last_usage_win() {
        let parts = vec![
            Ok(ServiceResult::json(json!({"text": "he"})).with_usage(Some(usage(1)))),
            Ok(ServiceResult::json(json!({"text": "hello"})).with_usage(Some(usage(2)))),
            Ok(ServiceResult::json(json!({"text": "hello!"}))),
        ];
        let folded = fold_results(futures::stream::iter(parts)).await.unwrap();
        assert_eq!(folded.output().unwrap()["text"], "hello!");
        assert_eq!(folded.usage.unwrap().characters, Some(2));
    }

    #[tokio::test]
    async fn first_error_stops_the_fold() {
        let parts = vec![
            Ok(ServiceResult::json(json!({"text": "partial"}))),
            Err(Error::ConnectionClosed),
        ];
        let err = fold_results(futures::stream::iter(parts)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
