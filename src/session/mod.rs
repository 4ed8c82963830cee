//! Full-duplex sessions: the caller streams frames in while results stream out.
//!
//! A [`DuplexSession`] is a cheap, cloneable handle. The first `send` (or an
//! explicit `start`) spawns a driver task that connects, opens the protocol
//! and then shuttles frames both ways until the session closes.

mod engine;
mod gate;
mod protocol;

pub use engine::{SessionEvent, SessionState};
pub use gate::{CompletionGate, Outcome};
pub use protocol::{DuplexProtocol, RealtimeProtocol, TaskProtocol};

use engine::{EventReceiver, Inbound, Launch, SessionCore};
use crate::error::{Error, Result};
use crate::protocol::{Frame, ServiceRequest, ServiceResult};
use crate::transport::{Connection, Connector};
use futures::Stream;
use reqwest::header::HeaderMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Close code sent when the session ends normally or is cancelled.
const NORMAL_CLOSURE: u16 = 1000;

struct Shared<P> {
    protocol: P,
    connector: Arc<dyn Connector>,
    request: ServiceRequest,
    url: String,
    headers: HeaderMap,
}

/// Handle to one full-duplex session.
pub struct DuplexSession<P: DuplexProtocol> {
    core: Arc<SessionCore>,
    shared: Arc<Shared<P>>,
}

impl<P: DuplexProtocol> Clone for DuplexSession<P> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: DuplexProtocol> std::fmt::Debug for DuplexSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexSession")
            .field("model", &self.shared.request.model)
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl<P: DuplexProtocol> DuplexSession<P> {
    /// Create an idle session. Nothing touches the network until the first
    /// frame is sent or [`start`](Self::start) is called.
    ///
    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` when the request cannot be
    /// addressed, before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn new(
        connector: Arc<dyn Connector>,
        config: &crate::config::ClientConfig,
        protocol: P,
        request: ServiceRequest,
    ) -> Result<(Self, SessionEvents)> {
        let url = protocol.endpoint(config, &request)?;
        let headers = config.headers_for(&request)?;
        let (core, rx) = SessionCore::new();
        let core = Arc::new(core);
        let events = SessionEvents {
            rx,
            core: Arc::clone(&core),
            finished: false,
        };
        let shared = Arc::new(Shared {
            protocol,
            connector,
            request,
            url,
            headers,
        });
        Ok((Self { core, shared }, events))
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Server-assigned session id, once the session has been created.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.core.session_id()
    }

    #[must_use]
    pub fn request_id(&self) -> Option<String> {
        self.core.request_id()
    }

    #[must_use]
    pub fn request(&self) -> &ServiceRequest {
        &self.shared.request
    }

    /// Open the transport without sending a frame.
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session already closed.
    #[allow(clippy::result_large_err)]
    pub fn start(&self) -> Result<()> {
        if let Some(launch) = self.core.start()? {
            self.launch(launch);
        }
        Ok(())
    }

    /// Queue or forward one frame. Never waits on the network.
    ///
    /// # Errors
    /// Returns `SessionClosed` once a stop was issued or the session closed.
    #[allow(clippy::result_large_err)]
    pub fn send(&self, frame: impl Into<Frame>) -> Result<()> {
        if let Some(launch) = self.core.send(frame.into())? {
            self.launch(launch);
        }
        Ok(())
    }

    /// Signal end of input and wait until the server confirms, fails or the
    /// session is cancelled.
    ///
    /// # Errors
    /// Returns `Timeout` if nothing happened within `timeout`, `Api` for a
    /// server or transport failure and `Cancelled` if the session was cancelled.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let (gate, launch) = self.core.request_stop();
        if let Some(launch) = launch {
            self.launch(launch);
        }
        match gate.wait_timeout(timeout).await {
            None => {
                tracing::warn!(?timeout, "Timed out waiting for the session to finish");
                Err(Error::Timeout(timeout))
            }
            Some(outcome) => outcome_to_result(outcome),
        }
    }

    /// Signal end of input without waiting; completion shows up on the event
    /// stream.
    pub fn async_stop(&self) {
        let (_, launch) = self.core.request_stop();
        if let Some(launch) = launch {
            self.launch(launch);
        }
    }

    /// Abandon the session and close the transport. Undelivered results are
    /// dropped. Safe to call more than once.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    /// Return to `Idle` so the handle can run again. Any in-flight run is
    /// torn down and its waiters are released.
    pub fn reset(&self) {
        self.core.reset();
    }

    fn launch(&self, launch: Launch) {
        let core = Arc::clone(&self.core);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let generation = launch.generation;
            match drive(&core, &shared, &launch).await {
                Ok(()) => core.on_closed(generation),
                Err(err) => core.on_failure(generation, err),
            }
        });
    }
}

#[allow(clippy::result_large_err)]
fn outcome_to_result(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Completed => Ok(()),
        Outcome::Failed(err) => Err(Error::Api(err)),
        Outcome::Cancelled => Err(Error::Cancelled),
        Outcome::Reset => Err(Error::SessionClosed),
    }
}

async fn close_quietly(conn: &mut dyn Connection, reason: &str) {
    if let Err(err) = conn.close(NORMAL_CLOSURE, reason).await {
        tracing::debug!("Close handshake failed: {err}");
    }
}

/// One run of a session: connect, open, then pump frames both ways.
async fn drive<P: DuplexProtocol>(core: &SessionCore, shared: &Shared<P>, launch: &Launch) -> Result<()> {
    let generation = launch.generation;
    let protocol = &shared.protocol;
    let task_id = uuid::Uuid::new_v4().simple().to_string();

    let mut conn = tokio::select! {
        conn = shared.connector.connect(&shared.url, shared.headers.clone()) => conn?,
        () = launch.abort.notified() => return Ok(()),
    };
    tracing::info!(model = %shared.request.model, task_id = %task_id, "Duplex session connected");

    if let Some(frame) = protocol.start_frame(&shared.request, &task_id)? {
        conn.send(frame).await?;
    }

    if protocol.awaits_start_ack() {
        loop {
            let frame = tokio::select! {
                frame = conn.next_frame() => frame?,
                () = launch.abort.notified() => {
                    close_quietly(conn.as_mut(), "cancelled").await;
                    return Ok(());
                }
            };
            let Some(frame) = frame else {
                return Ok(());
            };
            match core.on_frame(generation, protocol, frame)? {
                Inbound::Started => break,
                Inbound::Delivered => {}
                Inbound::Closed | Inbound::Stale => {
                    close_quietly(conn.as_mut(), "closed").await;
                    return Ok(());
                }
            }
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    if !core.attach_sink(generation, tx) {
        close_quietly(conn.as_mut(), "cancelled").await;
        return Ok(());
    }

    let mut outbound_open = true;
    loop {
        tokio::select! {
            frame = rx.recv(), if outbound_open => match frame {
                Some(frame) => conn.send(protocol.shape(frame, &task_id)?).await?,
                None => {
                    tracing::debug!("Outbound closed, waiting for the server to finish");
                    outbound_open = false;
                }
            },
            frame = conn.next_frame() => {
                let Some(frame) = frame? else {
                    return Ok(());
                };
                match core.on_frame(generation, protocol, frame)? {
                    Inbound::Delivered | Inbound::Started => {}
                    Inbound::Closed | Inbound::Stale => {
                        close_quietly(conn.as_mut(), "finished").await;
                        return Ok(());
                    }
                }
            }
            () = launch.abort.notified() => {
                close_quietly(conn.as_mut(), "cancelled").await;
                return Ok(());
            }
        }
    }
}

/// Results and terminal notifications of a session, in arrival order.
///
/// The stream does not end when a run ends, because a reset handle can run
/// again; stop reading once [`SessionEvent::is_terminal`] is true. Events of
/// superseded runs are filtered out, as is everything after a cancel except
/// the cancellation marker itself.
#[derive(Debug)]
pub struct SessionEvents {
    rx: EventReceiver,
    core: Arc<SessionCore>,
    finished: bool,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        futures::StreamExt::next(self).await
    }

    /// Next result of the run. A failure is yielded once; after that, or
    /// after completion or cancellation, this returns `None` for good.
    pub async fn next_result(&mut self) -> Option<Result<ServiceResult>> {
        if self.finished {
            return None;
        }
        let event = self.recv().await?;
        self.finished = event.is_terminal();
        match event {
            SessionEvent::Result(result) => Some(Ok(result)),
            SessionEvent::Failed(err) => Some(Err(err)),
            SessionEvent::Completed | SessionEvent::Cancelled => None,
        }
    }

    /// Next event that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        while let Ok((generation, event)) = self.rx.try_recv() {
            if self.core.is_deliverable(generation, &event) {
                return Some(event);
            }
        }
        None
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some((generation, event))) => {
                    if this.core.is_deliverable(generation, &event) {
                        return Poll::Ready(Some(event));
                    }
                }
                other => return other.map(|item| item.map(|(_, event)| event)),
            }
        }
    }
}
