pub mod approvals;
pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod model;
pub mod sse;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use approvals::{pending_tool_call_in, ApprovalGate};
pub use config::{
    EngineConfig, RunMode, DEFAULT_ENGINE_URL, DEFAULT_HISTORY_LIMIT, ENGINE_URL_ENV,
};
pub use controller::{RunCancel, RunController, RunState, StepOutcome};
pub use errors::EngineError;
pub use events::{interpret_frame, parse_event, MalformedFrame, NodeFields, StreamEvent};
pub use ledger::CheckpointLedger;
pub use model::{Checkpoint, Message, MessageKind, ThreadSnapshot, ToolCall};
pub use sse::{ByteStream, Frame, FrameDecoder, FrameReader};
pub use store::{RunStatus, ThreadStateStore, ThreadView};
pub use transport::{
    request_failure_message, EngineTransport, HttpTransport, RunBody, RunReply, RunRequest,
    TransportFuture,
};
