#![allow(dead_code)]

use async_trait::async_trait;
use dashscope_rt::protocol::WireFrame;
use dashscope_rt::transport::{Connection, Connector};
use dashscope_rt::{ClientConfig, Error, Result};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const WAIT: Duration = Duration::from_secs(1);

pub fn config() -> ClientConfig {
    ClientConfig::new().api_key("sk-test")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Closed(u16),
    Dropped,
}

pub struct MockConnection {
    sent: mpsc::UnboundedSender<WireFrame>,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
    lifecycle: mpsc::UnboundedSender<Lifecycle>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, frame: WireFrame) -> Result<()> {
        self.sent.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    async fn next_frame(&mut self) -> Result<Option<WireFrame>> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<()> {
        let _ = self.lifecycle.send(Lifecycle::Closed(code));
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        let _ = self.lifecycle.send(Lifecycle::Dropped);
    }
}

/// The server side of one mock connection.
pub struct MockServer {
    sent: mpsc::UnboundedReceiver<WireFrame>,
    push: Option<mpsc::UnboundedSender<WireFrame>>,
    lifecycle: mpsc::UnboundedReceiver<Lifecycle>,
}

impl MockServer {
    /// Next frame the client put on the wire.
    pub async fn next_sent(&mut self) -> WireFrame {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("client frame in time")
            .expect("connection open")
    }

    pub async fn next_sent_json(&mut self) -> Value {
        self.next_sent().await.json().expect("text frame with JSON")
    }

    /// Asserts the client sends nothing more for a short while.
    pub async fn assert_idle(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.sent.recv()).await;
        assert!(!matches!(next, Ok(Some(_))), "unexpected frame: {next:?}");
    }

    pub fn push_json(&self, value: &Value) {
        self.push_frame(WireFrame::Text(value.to_string()));
    }

    pub fn push_frame(&self, frame: WireFrame) {
        self.push
            .as_ref()
            .expect("server side still open")
            .send(frame)
            .expect("client still reading");
    }

    /// Close the server side; the client sees end of stream.
    pub fn hang_up(&mut self) {
        self.push = None;
    }

    pub async fn next_lifecycle(&mut self) -> Lifecycle {
        tokio::time::timeout(WAIT, self.lifecycle.recv())
            .await
            .expect("lifecycle event in time")
            .expect("lifecycle channel open")
    }
}

pub fn pair() -> (MockConnection, MockServer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let (life_tx, life_rx) = mpsc::unbounded_channel();
    let connection = MockConnection {
        sent: sent_tx,
        inbound: push_rx,
        lifecycle: life_tx,
    };
    let server = MockServer {
        sent: sent_rx,
        push: Some(push_tx),
        lifecycle: life_rx,
    };
    (connection, server)
}

/// Hands out prepared connections in order, optionally only once the test
/// releases the ready gate.
pub struct MockConnector {
    connections: Mutex<VecDeque<MockConnection>>,
    ready: Mutex<Option<oneshot::Receiver<()>>>,
    urls: Mutex<Vec<String>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(connections: Vec<MockConnection>) -> Self {
        Self {
            connections: Mutex::new(connections.into()),
            ready: Mutex::new(None),
            urls: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn gated(connections: Vec<MockConnection>) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let connector = Self::new(connections);
        *connector.ready.lock() = Some(rx);
        (connector, tx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str, _headers: HeaderMap) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        let ready = self.ready.lock().take();
        if let Some(ready) = ready {
            ready.await.map_err(|_| Error::ConnectionClosed)?;
        }
        let connection = self.connections.lock().pop_front().ok_or(Error::ConnectionClosed)?;
        Ok(Box::new(connection))
    }
}

/// One ungated connection.
pub fn single() -> (Arc<MockConnector>, MockServer) {
    let (connection, server) = pair();
    (Arc::new(MockConnector::new(vec![connection])), server)
}

/// One connection that only opens once the returned sender fires.
pub fn gated() -> (Arc<MockConnector>, MockServer, oneshot::Sender<()>) {
    let (connection, server) = pair();
    let (connector, ready) = MockConnector::gated(vec![connection]);
    (Arc::new(connector), server, ready)
}
