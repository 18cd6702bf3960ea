use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::controller::RunState;
use crate::errors::EngineError;
use crate::events::NodeFields;
use crate::model::{Message, ThreadSnapshot, ToolCall};

/// Run-related flags a UI needs, kept in one place instead of separate booleans.
#[derive(Clone, Debug, PartialEq)]
pub struct RunStatus {
    pub state: RunState,
    pub current_node: Option<String>,
    pub pending_approval: Option<ToolCall>,
    pub last_error: Option<EngineError>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            current_node: None,
            pending_approval: None,
            last_error: None,
        }
    }
}

impl RunStatus {
    pub fn is_loading(&self) -> bool {
        self.state.is_in_flight()
    }

    /// User-visible error text, verbatim.
    pub fn error_text(&self) -> Option<String> {
        self.last_error.as_ref().map(ToString::to_string)
    }
}

/// Local projection of one thread: what the UI renders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThreadView {
    pub thread_id: String,
    pub messages: Vec<Message>,
    /// Messages at or after this index are provisional (optimistic input, streamed
    /// node output) and are dropped by the next authoritative fetch.
    pub authoritative_len: usize,
    pub next: Vec<String>,
    pub checkpoint_id: Option<String>,
    /// Set while the view shows a past checkpoint instead of the thread head.
    pub traveled_to: Option<String>,
    /// Latest partial fields streamed by nodes since the last authoritative fetch.
    pub node_fields: NodeFields,
    pub run: RunStatus,
    /// Bumped on every write so pollers can detect change cheaply.
    pub version: u64,
}

impl ThreadView {
    pub fn provisional(&self) -> &[Message] {
        let start = self.authoritative_len.min(self.messages.len());
        &self.messages[start..]
    }

    pub fn is_finished(&self) -> bool {
        self.next.is_empty()
    }

    pub fn is_time_traveling(&self) -> bool {
        self.traveled_to.is_some()
    }
}

/// Shared, lock-free readable thread view. Clones share the same cell; only the
/// owning controller writes.
#[derive(Clone, Debug)]
pub struct ThreadStateStore {
    view: Arc<ArcSwap<ThreadView>>,
}

impl ThreadStateStore {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let view = ThreadView {
            thread_id: thread_id.into(),
            ..ThreadView::default()
        };
        Self {
            view: Arc::new(ArcSwap::from_pointee(view)),
        }
    }

    /// Current view. Holding the Arc never blocks writers.
    /// Allocation: none. Complexity: O(1).
    pub fn snapshot(&self) -> Arc<ThreadView> {
        self.view.load_full()
    }

    /// Copy-on-write update.
    /// Allocation: one ThreadView clone per write. Complexity: O(messages).
    fn update(&self, apply: impl FnOnce(&mut ThreadView)) {
        let mut next = ThreadView::clone(&self.view.load());
        apply(&mut next);
        next.version = next.version.wrapping_add(1);
        self.view.store(Arc::new(next));
    }

    pub(crate) fn append_provisional(&self, message: Message) {
        self.update(|view| view.messages.push(message));
    }

    pub(crate) fn record_node(&self, node: &str, message: Option<Message>, fields: NodeFields) {
        self.update(|view| {
            view.run.current_node = Some(node.to_owned());
            if let Some(message) = message {
                view.messages.push(message);
            }
            merge_fields(&mut view.node_fields, fields);
        });
    }

    /// Replace the whole view with the engine's head state. Nothing local survives.
    pub(crate) fn replace_authoritative(&self, snapshot: ThreadSnapshot) {
        self.update(|view| {
            view.authoritative_len = snapshot.messages.len();
            view.messages = snapshot.messages;
            view.next = snapshot.next;
            view.checkpoint_id = snapshot.checkpoint_id;
            view.traveled_to = None;
            view.node_fields = NodeFields::default();
        });
    }

    /// Display a historical checkpoint. Only the displayed state changes.
    pub(crate) fn show_checkpoint(&self, checkpoint_id: &str, snapshot: ThreadSnapshot) {
        self.update(|view| {
            view.authoritative_len = snapshot.messages.len();
            view.messages = snapshot.messages;
            view.next = snapshot.next;
            view.checkpoint_id = Some(checkpoint_id.to_owned());
            view.traveled_to = Some(checkpoint_id.to_owned());
            view.node_fields = NodeFields::default();
        });
    }

    pub(crate) fn set_next(&self, next: Vec<String>) {
        self.update(|view| view.next = next);
    }

    pub(crate) fn publish_status(&self, status: RunStatus) {
        self.update(|view| view.run = status);
    }
}

fn merge_fields(current: &mut NodeFields, incoming: NodeFields) {
    if incoming.plan.is_some() {
        current.plan = incoming.plan;
    }
    if incoming.draft.is_some() {
        current.draft = incoming.draft;
    }
    if incoming.critique.is_some() {
        current.critique = incoming.critique;
    }
    if incoming.queries.is_some() {
        current.queries = incoming.queries;
    }
}
