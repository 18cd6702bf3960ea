use serde::Deserialize;
use serde_json::Value;

use crate::errors::EngineError;
use crate::model::{null_as_default, Message, ToolCall};
use crate::sse::Frame;

/// Partial state fields some graphs attach to node progress (planner/writer graphs).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeFields {
    pub plan: Option<String>,
    pub draft: Option<String>,
    pub critique: Option<String>,
    pub queries: Option<Vec<String>>,
}

impl NodeFields {
    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.draft.is_none()
            && self.critique.is_none()
            && self.queries.is_none()
    }
}

/// Typed progress reported by the engine for one run.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    NodeStarted {
        node: String,
        message: Option<Message>,
        fields: NodeFields,
    },
    Interrupted {
        next: Vec<String>,
        pending_tool_call: Option<ToolCall>,
    },
    Completed,
    Failed {
        reason: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NodeStarted { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeStarted { .. } => "node",
            Self::Interrupted { .. } => "interrupt",
            Self::Completed => "complete",
            Self::Failed { .. } => "error",
        }
    }
}

/// A frame whose payload could not be mapped to an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedFrame {
    /// Discriminator value when the payload was at least a JSON object with `event`.
    pub event: Option<String>,
    pub reason: String,
}

impl MalformedFrame {
    /// A broken `interrupt`/`complete`/`error` frame ends the run; anything else is
    /// dropped so newer servers can add event kinds.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event.as_deref(),
            Some("interrupt" | "complete" | "error")
        )
    }

    pub fn into_error(self) -> EngineError {
        match self.event {
            Some(event) => EngineError::Protocol(format!("malformed {event} frame: {}", self.reason)),
            None => EngineError::Protocol(format!("malformed frame: {}", self.reason)),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    Node {
        node: String,
        #[serde(default, deserialize_with = "null_as_default")]
        data: WireNodeData,
    },
    Interrupt {
        #[serde(deserialize_with = "null_as_default")]
        next: Vec<String>,
        #[serde(default)]
        pending_tool_call: Option<ToolCall>,
    },
    Complete {},
    Error {
        error: String,
    },
}

#[derive(Default, Deserialize)]
struct WireNodeData {
    #[serde(default)]
    message: Option<Message>,
    #[serde(default, deserialize_with = "null_as_default")]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    plan: Option<String>,
    #[serde(default)]
    draft: Option<String>,
    #[serde(default)]
    critique: Option<String>,
    #[serde(default)]
    queries: Option<Vec<String>>,
}

/// Interpret one decoded frame. Frames without a payload (keep-alives) yield `Ok(None)`.
/// Allocation: one JSON tree per payload. Complexity: O(payload length).
pub fn interpret_frame(frame: &Frame) -> Result<Option<StreamEvent>, MalformedFrame> {
    match frame.data.as_deref() {
        None => Ok(None),
        Some(payload) if payload.trim().is_empty() => Ok(None),
        Some(payload) => parse_event(payload).map(Some),
    }
}

/// Parse one JSON payload against the event schema.
pub fn parse_event(payload: &str) -> Result<StreamEvent, MalformedFrame> {
    let value: Value = serde_json::from_str(payload).map_err(|err| MalformedFrame {
        event: None,
        reason: err.to_string(),
    })?;
    let event = value
        .get("event")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let wire: WireEvent = serde_json::from_value(value).map_err(|err| MalformedFrame {
        event,
        reason: err.to_string(),
    })?;
    Ok(wire.into())
}

impl From<WireEvent> for StreamEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::Node { node, data } => {
                let fields = NodeFields {
                    plan: data.plan,
                    draft: data.draft,
                    critique: data.critique,
                    queries: data.queries,
                };
                let message = data
                    .message
                    .map(|message| attach_tool_calls(message, data.tool_calls));
                StreamEvent::NodeStarted {
                    node,
                    message,
                    fields,
                }
            }
            WireEvent::Interrupt {
                next,
                pending_tool_call,
            } => StreamEvent::Interrupted {
                next,
                pending_tool_call,
            },
            WireEvent::Complete {} => StreamEvent::Completed,
            WireEvent::Error { error } => StreamEvent::Failed { reason: error },
        }
    }
}

/// Node frames carry tool calls beside the message; fold them into the AI message
/// unless it already lists its own.
fn attach_tool_calls(message: Message, sidecar: Vec<ToolCall>) -> Message {
    match message {
        Message::Ai {
            content,
            tool_calls,
        } if tool_calls.is_empty() && !sidecar.is_empty() => Message::Ai {
            content,
            tool_calls: sidecar,
        },
        other => other,
    }
}
