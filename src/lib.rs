#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Client for the DashScope model-serving API: half-duplex calls over HTTP or
//! WebSocket, full-duplex streaming sessions, and asynchronous tasks.

pub mod config;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, Credentials};
pub use error::{ApiError, Error, Result};
pub use protocol::{
    ApiProtocol, Frame, Payload, ServiceRequest, ServiceRequestBuilder, ServiceResult, StreamingMode,
    TaskList, TaskListQuery, TaskStatus, Usage, WireFrame,
};
pub use sdk::{
    AsyncTasks, Conversation, DashScope, DashScopeBuilder, HalfDuplex, PollBackoff, Recognition,
    RecognitionResult, SpeechSynthesizer, WaitPolicy,
};
pub use session::{DuplexSession, SessionEvent, SessionEvents, SessionState};
pub use transport::{Connection, Connector, RestClient, WsConnector};

pub(crate) const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
