//! The full-duplex session state machine.
//!
//! Everything mutable lives in one [`Inner`] behind one mutex. Caller
//! operations (`send`, `request_stop`, `cancel`, `reset`) and transport
//! callbacks (`attach_sink`, `on_frame`, `on_closed`, `on_failure`) all go
//! through it, and none of them ever holds the lock across an `.await`.

use super::gate::{CompletionGate, Outcome};
use super::protocol::DuplexProtocol;
use crate::error::{Error, Result};
use crate::protocol::{EventKind, Frame, ServiceResult, WireFrame};
use crate::{TRACE_LOG_MAX_BYTES, safe_truncate};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Started,
    Closed,
}

/// What the caller receives from a session.
#[derive(Debug)]
pub enum SessionEvent {
    Result(ServiceResult),
    /// Clean end: the server acknowledged the end of input.
    Completed,
    /// Server-reported error or transport failure. Results delivered earlier stand.
    Failed(Error),
    Cancelled,
}

impl SessionEvent {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Result(_))
    }
}

pub(crate) type EventSender = mpsc::UnboundedSender<(u64, SessionEvent)>;
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<(u64, SessionEvent)>;

/// The outbound channel. It becomes `Present` once per run, when the
/// transport is writable, and `Completed` once a stop marker went through it.
#[derive(Debug, Default)]
enum Sink {
    #[default]
    Absent,
    Present(mpsc::UnboundedSender<Frame>),
    Completed,
}

/// Handed to the caller that moved the session from `Idle` to `Started`; it
/// must spawn the transport driver for this generation.
#[derive(Debug, Clone)]
pub struct Launch {
    pub generation: u64,
    pub abort: Arc<Notify>,
}

/// What the driver should do after an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Delivered,
    Started,
    /// The session reached `Closed`; the driver should close the socket.
    Closed,
    /// The frame belongs to a cancelled or superseded run.
    Stale,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    generation: u64,
    pending: VecDeque<Frame>,
    sink: Sink,
    stop_requested: bool,
    cancelled: bool,
    gate: Arc<CompletionGate>,
    abort: Arc<Notify>,
    session_id: Option<String>,
    request_id: Option<String>,
    events: EventSender,
}

impl Inner {
    fn deliver(&self, event: SessionEvent) {
        if self.events.send((self.generation, event)).is_err() {
            tracing::debug!("Session event dropped: receiver is gone");
        }
    }

    fn start(&mut self) -> Option<Launch> {
        if self.state != SessionState::Idle {
            return None;
        }
        self.state = SessionState::Started;
        tracing::debug!(generation = self.generation, "Session started");
        Some(Launch {
            generation: self.generation,
            abort: Arc::clone(&self.abort),
        })
    }

    #[allow(clippy::result_large_err)]
    fn enqueue(&mut self, frame: Frame) -> Result<Option<Launch>> {
        if self.cancelled || self.state == SessionState::Closed || self.stop_requested {
            return Err(Error::SessionClosed);
        }
        let launch = self.start();
        let is_stop = frame.is_stop();
        if is_stop {
            self.stop_requested = true;
        }
        match &self.sink {
            Sink::Present(tx) => {
                tx.send(frame).map_err(|_| Error::ConnectionClosed)?;
                if is_stop {
                    self.sink = Sink::Completed;
                }
            }
            Sink::Absent => self.pending.push_back(frame),
            Sink::Completed => return Err(Error::SessionClosed),
        }
        Ok(launch)
    }

    fn close(&mut self, outcome: Outcome, event: SessionEvent) {
        if self.state == SessionState::Closed {
            return;
        }
        tracing::debug!(generation = self.generation, ?outcome, "Session closed");
        self.state = SessionState::Closed;
        self.sink = Sink::Absent;
        self.pending.clear();
        self.gate.release(outcome);
        self.deliver(event);
    }

    fn is_live(&self, generation: u64) -> bool {
        generation == self.generation && !self.cancelled && self.state != SessionState::Closed
    }

    fn tag(&self, result: ServiceResult) -> ServiceResult {
        let request_id = result.request_id.clone().or_else(|| self.request_id.clone());
        result
            .with_session_id(self.session_id.clone())
            .with_request_id(request_id)
    }
}

#[derive(Debug)]
pub struct SessionCore {
    inner: Mutex<Inner>,
}

impl SessionCore {
    pub(crate) fn new() -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            state: SessionState::Idle,
            generation: 0,
            pending: VecDeque::new(),
            sink: Sink::Absent,
            stop_requested: false,
            cancelled: false,
            gate: Arc::new(CompletionGate::new()),
            abort: Arc::new(Notify::new()),
            session_id: None,
            request_id: None,
            events,
        };
        (Self { inner: Mutex::new(inner) }, rx)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    #[must_use]
    pub fn request_id(&self) -> Option<String> {
        self.inner.lock().request_id.clone()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Explicit `Idle -> Started` without a frame.
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session already closed.
    #[allow(clippy::result_large_err)]
    pub fn start(&self) -> Result<Option<Launch>> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        Ok(inner.start())
    }

    /// Forward to the live sink, or queue until the transport is writable.
    /// Never blocks.
    ///
    /// # Errors
    /// Returns `SessionClosed` once a stop was issued or the session closed.
    #[allow(clippy::result_large_err)]
    pub fn send(&self, frame: Frame) -> Result<Option<Launch>> {
        self.inner.lock().enqueue(frame)
    }

    /// Issue the stop marker (once) and hand back the gate to wait on.
    /// Repeated calls and calls on a closed session only return the gate.
    pub fn request_stop(&self) -> (Arc<CompletionGate>, Option<Launch>) {
        let mut inner = self.inner.lock();
        let gate = Arc::clone(&inner.gate);
        if inner.stop_requested || inner.cancelled || inner.state == SessionState::Closed {
            return (gate, None);
        }
        match inner.enqueue(Frame::Stop) {
            Ok(launch) => (gate, launch),
            Err(err) => {
                inner.close(Outcome::Failed(err.to_api_error()), SessionEvent::Failed(err));
                (gate, None)
            }
        }
    }

    /// Transport-ready callback: drain queued frames, in order, into the new
    /// sink. Returns `false` if this run is no longer wanted.
    pub fn attach_sink(&self, generation: u64, sink: mpsc::UnboundedSender<Frame>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_live(generation) {
            return false;
        }
        let mut stopped = false;
        while let Some(frame) = inner.pending.pop_front() {
            stopped = frame.is_stop();
            if sink.send(frame).is_err() {
                return false;
            }
            if stopped {
                break;
            }
        }
        tracing::debug!(generation, stopped, "Sink attached");
        inner.sink = if stopped { Sink::Completed } else { Sink::Present(sink) };
        true
    }

    /// Classify and route one inbound frame.
    ///
    /// # Errors
    /// Returns `Serialization` for a text frame that is not JSON.
    #[allow(clippy::result_large_err)]
    pub fn on_frame(
        &self,
        generation: u64,
        protocol: &dyn DuplexProtocol,
        frame: WireFrame,
    ) -> Result<Inbound> {
        let mut inner = self.inner.lock();
        if !inner.is_live(generation) {
            tracing::warn!(generation, "Discarding inbound frame for an inactive session");
            return Ok(Inbound::Stale);
        }
        let message: Value = match frame {
            WireFrame::Binary(bytes) => {
                let result = inner.tag(ServiceResult::binary(bytes));
                inner.deliver(SessionEvent::Result(result));
                return Ok(Inbound::Delivered);
            }
            WireFrame::Text(text) => {
                tracing::trace!("Inbound: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                serde_json::from_str(&text)?
            }
        };
        if inner.request_id.is_none() {
            inner.request_id = protocol.request_id(&message);
        }
        match protocol.classify(&message) {
            EventKind::Started => Ok(Inbound::Started),
            EventKind::SessionCreated => {
                inner.session_id = protocol.session_id(&message);
                tracing::debug!(session_id = ?inner.session_id, "Session created");
                let result = inner.tag(protocol.to_result(message));
                inner.deliver(SessionEvent::Result(result));
                Ok(Inbound::Delivered)
            }
            EventKind::Data => {
                let result = inner.tag(protocol.to_result(message));
                inner.deliver(SessionEvent::Result(result));
                Ok(Inbound::Delivered)
            }
            EventKind::TurnDone => {
                let result = inner.tag(protocol.to_result(message));
                inner.deliver(SessionEvent::Result(result));
                if inner.stop_requested {
                    inner.close(Outcome::Completed, SessionEvent::Completed);
                    return Ok(Inbound::Closed);
                }
                Ok(Inbound::Delivered)
            }
            EventKind::Finished => {
                if protocol.has_output(&message) {
                    let result = inner.tag(protocol.to_result(message));
                    inner.deliver(SessionEvent::Result(result));
                }
                inner.close(Outcome::Completed, SessionEvent::Completed);
                Ok(Inbound::Closed)
            }
            EventKind::Failed => {
                let mut err = protocol.to_error(&message);
                if err.request_id.is_none() {
                    err.request_id.clone_from(&inner.request_id);
                }
                inner.close(Outcome::Failed(err.clone()), SessionEvent::Failed(Error::Api(err)));
                Ok(Inbound::Closed)
            }
        }
    }

    /// The transport closed without error.
    pub fn on_closed(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if !inner.is_live(generation) {
            return;
        }
        if inner.stop_requested {
            inner.close(Outcome::Completed, SessionEvent::Completed);
        } else {
            let err = Error::ConnectionClosed;
            inner.close(Outcome::Failed(err.to_api_error()), SessionEvent::Failed(err));
        }
    }

    /// The transport failed. Releases anyone blocked in `stop`.
    pub fn on_failure(&self, generation: u64, err: Error) {
        let mut inner = self.inner.lock();
        if !inner.is_live(generation) {
            tracing::debug!(generation, "Ignoring failure of an inactive session: {err}");
            return;
        }
        tracing::warn!("Session failed: {err}");
        inner.close(Outcome::Failed(err.to_api_error()), SessionEvent::Failed(err));
    }

    /// Drop undelivered output and force the transport closed. Idempotent.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.cancelled || inner.state == SessionState::Closed {
            return;
        }
        inner.cancelled = true;
        inner.close(Outcome::Cancelled, SessionEvent::Cancelled);
        inner.abort.notify_one();
    }

    /// Back to `Idle` for reuse. Queued frames, the sink and the previous
    /// gate are discarded; waiters on the old gate see [`Outcome::Reset`].
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.gate.release(Outcome::Reset);
        inner.abort.notify_one();
        inner.generation += 1;
        inner.state = SessionState::Idle;
        inner.pending.clear();
        inner.sink = Sink::Absent;
        inner.stop_requested = false;
        inner.cancelled = false;
        inner.session_id = None;
        inner.request_id = None;
        inner.gate = Arc::new(CompletionGate::new());
        inner.abort = Arc::new(Notify::new());
        tracing::debug!(generation = inner.generation, "Session reset");
    }

    /// Whether an event queued for `generation` may still reach the caller.
    /// After a cancel only the cancellation marker itself gets through.
    pub(crate) fn is_deliverable(&self, generation: u64, event: &SessionEvent) -> bool {
        let inner = self.inner.lock();
        generation == inner.generation
            && (!inner.cancelled || matches!(event, SessionEvent::Cancelled))
    }
}
