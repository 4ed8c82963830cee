use bytes::Bytes;
use serde_json::Value;

/// One caller-fed unit of a full-duplex request body.
///
/// Frames are immutable once enqueued; the session queue owns them until they
/// are handed to the live sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON directive, shaped into a text frame by the session protocol.
    Command(Value),
    /// Raw media bytes, sent as a binary frame with no envelope.
    Binary(Bytes),
    /// End of caller input. Nothing may follow it.
    Stop,
}

impl Frame {
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

impl From<Value> for Frame {
    fn from(value: Value) -> Self {
        Self::Command(value)
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

/// A frame as it travels on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Parse a text frame as JSON. Binary frames yield `None`.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        self.as_text().and_then(|text| serde_json::from_str(text).ok())
    }
}
