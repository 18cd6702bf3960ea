//! Public facade for the tether workspace.
//! Default path: use `Client`. Use `tether::runtime` to drive a `RunController` directly.

mod client;

pub use client::{ask, ask_with_config, Client, ClientError};
pub use tether_runtime::{
    ApprovalGate, Checkpoint, CheckpointLedger, EngineConfig, EngineError, Message, MessageKind,
    NodeFields, RunCancel, RunController, RunMode, RunState, RunStatus, StepOutcome, StreamEvent,
    ThreadSnapshot, ThreadStateStore, ThreadView, ToolCall,
};

pub use tether_runtime as runtime;
