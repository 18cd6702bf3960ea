use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::RunMode;
use crate::errors::EngineError;
use crate::events::StreamEvent;
use crate::model::{null_as_default, Checkpoint, Message, ThreadSnapshot, ToolCall};
use crate::sse::ByteStream;

mod http;

pub use http::HttpTransport;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One request that starts engine work on a thread.
#[derive(Clone, Debug, PartialEq)]
pub enum RunRequest {
    Start {
        thread_id: String,
        message: String,
        use_hitl: bool,
        mode: RunMode,
    },
    /// Answer to a pending approval.
    Resume {
        thread_id: String,
        approved: bool,
        modified_args: Option<Map<String, Value>>,
    },
    /// Fork: run again from a past checkpoint.
    ResumeFromCheckpoint {
        thread_id: String,
        checkpoint_id: String,
        new_input: Option<Value>,
    },
}

impl RunRequest {
    pub fn thread_id(&self) -> &str {
        match self {
            Self::Start { thread_id, .. }
            | Self::Resume { thread_id, .. }
            | Self::ResumeFromCheckpoint { thread_id, .. } => thread_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start {
                mode: RunMode::Streaming,
                ..
            } => "stream",
            Self::Start {
                mode: RunMode::Blocking,
                ..
            } => "invoke",
            Self::Resume { .. } => "resume",
            Self::ResumeFromCheckpoint { .. } => "checkpoint_resume",
        }
    }
}

/// Response of a run request: either an SSE body or one JSON reply.
pub enum RunBody {
    Events(ByteStream),
    Reply(RunReply),
}

impl std::fmt::Debug for RunBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Events(_) => f.write_str("RunBody::Events(..)"),
            Self::Reply(reply) => f.debug_tuple("RunBody::Reply").field(reply).finish(),
        }
    }
}

/// JSON reply of the non-streaming run endpoints.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RunReply {
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RunReply {
    /// Translate the reply into the terminal event a stream would have ended with.
    /// Allocation: one event. Complexity: O(1).
    pub fn into_event(self) -> StreamEvent {
        if self.status == "error" {
            return StreamEvent::Failed {
                reason: self
                    .message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| "run failed".to_owned()),
            };
        }
        if self.status == "interrupted" || !self.next.is_empty() {
            return StreamEvent::Interrupted {
                next: self.next,
                pending_tool_call: self.tool_calls.into_iter().next(),
            };
        }
        StreamEvent::Completed
    }
}

/// REST and streaming surface of the engine. `HttpTransport` is the production
/// implementation; tests script their own.
pub trait EngineTransport: Send + Sync {
    fn create_thread<'a>(
        &'a self,
        thread_id: Option<&'a str>,
    ) -> TransportFuture<'a, Result<String, EngineError>>;

    fn thread_state<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> TransportFuture<'a, Result<ThreadSnapshot, EngineError>>;

    fn thread_history<'a>(
        &'a self,
        thread_id: &'a str,
        limit: usize,
    ) -> TransportFuture<'a, Result<Vec<Checkpoint>, EngineError>>;

    fn checkpoint_state<'a>(
        &'a self,
        thread_id: &'a str,
        checkpoint_id: &'a str,
    ) -> TransportFuture<'a, Result<ThreadSnapshot, EngineError>>;

    /// Merge `updates` into the thread's head state as a new checkpoint.
    fn update_state<'a>(
        &'a self,
        thread_id: &'a str,
        updates: Map<String, Value>,
    ) -> TransportFuture<'a, Result<(), EngineError>>;

    fn open_run<'a>(
        &'a self,
        request: RunRequest,
    ) -> TransportFuture<'a, Result<RunBody, EngineError>>;
}

/// Normalize an HTTP failure into the server's `detail` text or a generic message.
/// Allocation: one String. Complexity: O(body length).
pub fn request_failure_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|detail| !detail.is_empty())
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| format!("request failed with status {status}"))
}
