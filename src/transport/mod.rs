//! Transport collaborators. The session engine only sees these traits; the
//! WebSocket and HTTP implementations live in the submodules.

pub mod rest;
pub mod sse;
pub mod ws;

use crate::Result;
use crate::protocol::WireFrame;
use async_trait::async_trait;
use reqwest::header::HeaderMap;

/// Opens duplex connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, headers: HeaderMap) -> Result<Box<dyn Connection>>;
}

/// One live duplex connection.
///
/// `next_frame` must be cancel-safe: the session driver races it against its
/// outbound queue. Dropping a connection closes the socket.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: WireFrame) -> Result<()>;

    /// Next inbound text or binary frame; `None` once the peer has closed.
    async fn next_frame(&mut self) -> Result<Option<WireFrame>>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

pub use rest::{RestClient, TaskBackend};
pub use ws::WsConnector;
