use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Map<String, Value>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args,
            id: id.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Human,
    Ai,
    Tool,
    System,
}

/// Local chat message. The wire shape is `{type, content, tool_calls?, tool_call_id?}`;
/// both class-style (`AIMessage`) and short (`ai`) type tags are accepted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum Message {
    Human {
        content: String,
    },
    Ai {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: Option<String>,
    },
    System {
        content: String,
    },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Human { .. } => MessageKind::Human,
            Self::Ai { .. } => MessageKind::Ai,
            Self::Tool { .. } => MessageKind::Tool,
            Self::System { .. } => MessageKind::System,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Human { content }
            | Self::Ai { content, .. }
            | Self::Tool { content, .. }
            | Self::System { content } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_default"
    )]
    tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let content = content_text(wire.content);
        match wire.kind.as_str() {
            "HumanMessage" | "human" => Ok(Self::Human { content }),
            "AIMessage" | "AIMessageChunk" | "ai" => Ok(Self::Ai {
                content,
                tool_calls: wire.tool_calls,
            }),
            "ToolMessage" | "tool" => Ok(Self::Tool {
                content,
                tool_call_id: wire.tool_call_id,
            }),
            "SystemMessage" | "system" => Ok(Self::System { content }),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        let (kind, content, tool_calls, tool_call_id) = match message {
            Message::Human { content } => ("human", content, Vec::new(), None),
            Message::Ai {
                content,
                tool_calls,
            } => ("ai", content, tool_calls, None),
            Message::Tool {
                content,
                tool_call_id,
            } => ("tool", content, Vec::new(), tool_call_id),
            Message::System { content } => ("system", content, Vec::new(), None),
        };
        Self {
            kind: kind.to_owned(),
            content: Value::String(content),
            tool_calls,
            tool_call_id,
        }
    }
}

/// Multi-part content lists are kept as their JSON text.
fn content_text(content: Value) -> String {
    match content {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Authoritative thread state as reported by the engine, either at the head or at
/// one checkpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ThreadSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next: Vec<String>,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

/// One entry of the server's checkpoint log.
///
/// As received, `index` is the position in the history page with 0 for the head.
/// [`CheckpointLedger`](crate::CheckpointLedger) renumbers its entries oldest first.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub index: u64,
    pub checkpoint_id: String,
    #[serde(default)]
    pub parent_checkpoint_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages_count: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct HistoryPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) checkpoints: Vec<Checkpoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CreatedThread {
    pub(crate) thread_id: String,
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
