use super::{Connection, Connector};
use crate::error::Result;
use crate::protocol::WireFrame;
use crate::{TRACE_LOG_MAX_BYTES, safe_truncate};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::header::HeaderMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

#[derive(Debug)]
pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    pub(crate) const fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self(stream)
    }
}

/// Establish a WebSocket connection with the given handshake headers.
///
/// # Errors
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(url: &str, headers: HeaderMap) -> Result<WsStream> {
    let url = Url::parse(url)?;
    let mut req = url.as_str().into_client_request()?;
    req.headers_mut().extend(headers);
    let (ws_stream, _) = connect_async(req).await?;

    tracing::info!("Connected to {}", url.path());

    Ok(WsStream::new(ws_stream))
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, headers: HeaderMap) -> Result<Box<dyn Connection>> {
        let stream = connect(url, headers).await?;
        Ok(Box::new(WsConnection { stream }))
    }
}

pub struct WsConnection {
    stream: WsStream,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: WireFrame) -> Result<()> {
        let message = match frame {
            WireFrame::Text(text) => {
                tracing::trace!("Sending frame: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                Message::Text(text.into())
            }
            WireFrame::Binary(bytes) => {
                tracing::trace!("Sending binary frame ({} bytes)", bytes.len());
                Message::Binary(bytes)
            }
        };
        self.stream.0.send(message).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<WireFrame>> {
        while let Some(msg) = self.stream.0.next().await {
            match msg? {
                Message::Text(text) => {
                    tracing::trace!("Received frame: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                    return Ok(Some(WireFrame::Text(text.as_str().to_owned())));
                }
                Message::Binary(bytes) => {
                    tracing::trace!("Received binary frame ({} bytes)", bytes.len());
                    return Ok(Some(WireFrame::Binary(bytes)));
                }
                Message::Close(frame) => {
                    tracing::info!("WebSocket connection closed by server: {frame:?}");
                    return Ok(None);
                }
                // tungstenite queues the Pong and flushes it on the next read or write.
                Message::Ping(_) => tracing::trace!("Received Ping"),
                _ => (),
            }
        }
        Ok(None)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream.0.close(Some(frame)).await?;
        Ok(())
    }
}
