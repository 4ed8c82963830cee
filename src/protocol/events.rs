use std::collections::HashMap;

/// What an inbound event means to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Carries the server-assigned session id; forwarded to the caller.
    SessionCreated,
    /// Acknowledges the start envelope; the outbound channel becomes writable.
    Started,
    /// Forwarded to the caller verbatim. Unknown names land here too.
    Data,
    /// Forwarded, and terminal once the caller has issued a stop.
    TurnDone,
    /// Forwarded when it carries output, then closes the session.
    Finished,
    /// Closes the session with an error.
    Failed,
}

/// Lookup from event name to its kind. Names that are not in the table pass
/// through as [`EventKind::Data`].
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    entries: HashMap<&'static str, EventKind>,
}

impl EventTable {
    #[must_use]
    pub fn new(entries: &[(&'static str, EventKind)]) -> Self {
        Self {
            entries: entries.iter().copied().collect(),
        }
    }

    #[must_use]
    pub fn classify(&self, name: Option<&str>) -> EventKind {
        name.and_then(|name| self.entries.get(name).copied())
            .unwrap_or(EventKind::Data)
    }
}

pub mod task {
    //! Event names of the task envelope (`header.event`).
    pub const TASK_STARTED: &str = "task-started";
    pub const RESULT_GENERATED: &str = "result-generated";
    pub const TASK_FINISHED: &str = "task-finished";
    pub const TASK_FAILED: &str = "task-failed";

    pub const RUN_TASK: &str = "run-task";
    pub const CONTINUE_TASK: &str = "continue-task";
    pub const FINISH_TASK: &str = "finish-task";
}

pub mod realtime {
    //! Event names of the realtime envelope (`type`).
    pub const SESSION_UPDATE: &str = "session.update";
    pub const SESSION_FINISH: &str = "session.finish";
    pub const INPUT_AUDIO_BUFFER_APPEND: &str = "input_audio_buffer.append";
    pub const INPUT_AUDIO_BUFFER_COMMIT: &str = "input_audio_buffer.commit";
    pub const INPUT_AUDIO_BUFFER_CLEAR: &str = "input_audio_buffer.clear";
    pub const INPUT_IMAGE_BUFFER_APPEND: &str = "input_image_buffer.append";
    pub const RESPONSE_CREATE: &str = "response.create";
    pub const RESPONSE_CANCEL: &str = "response.cancel";

    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_UPDATED: &str = "session.updated";
    pub const SESSION_FINISHED: &str = "session.finished";
    pub const RESPONSE_CREATED: &str = "response.created";
    pub const RESPONSE_AUDIO_DELTA: &str = "response.audio.delta";
    pub const RESPONSE_AUDIO_TRANSCRIPT_DELTA: &str = "response.audio_transcript.delta";
    pub const RESPONSE_DONE: &str = "response.done";
    pub const ERROR: &str = "error";
}
