//! Wire-level types: frames, request framing, result envelopes, event names
//! and async task records.

pub mod events;
pub mod frame;
pub mod request;
pub mod result;
pub mod task;

pub use events::{EventKind, EventTable};
pub use frame::{Frame, WireFrame};
pub use request::{ApiProtocol, ServiceRequest, ServiceRequestBuilder, StreamingMode};
pub use result::{Payload, ServiceResult, Usage};
pub use task::{TaskList, TaskListQuery, TaskStatus};
