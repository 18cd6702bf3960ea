use serde_json::{Map, Value};

use crate::controller::{RunController, RunState};
use crate::errors::EngineError;
use crate::model::{Message, ToolCall};
use crate::transport::RunRequest;

/// Holds the tool call the engine paused on, if any.
///
/// Armed only while the controller is `Interrupted`; any decision, new run, travel
/// or failure disarms it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApprovalGate {
    pending: Option<ToolCall>,
}

impl ApprovalGate {
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&ToolCall> {
        self.pending.as_ref()
    }

    pub(crate) fn arm(&mut self, call: ToolCall) {
        self.pending = Some(call);
    }

    pub(crate) fn clear(&mut self) -> Option<ToolCall> {
        self.pending.take()
    }
}

/// First tool call requested by the trailing AI message, which is what a paused
/// engine is waiting to run.
/// Allocation: one ToolCall clone. Complexity: O(1).
pub fn pending_tool_call_in(messages: &[Message]) -> Option<ToolCall> {
    match messages.last()? {
        Message::Ai { tool_calls, .. } => tool_calls.first().cloned(),
        _ => None,
    }
}

impl RunController {
    /// Approve or reject the pending tool call as-is.
    /// Side effects: one resume request; the gate is cleared whatever the outcome.
    pub async fn decide(&mut self, approved: bool) -> Result<(), EngineError> {
        self.submit_decision(approved, None).await
    }

    /// Approve the pending tool call with replacement arguments.
    pub async fn decide_with_args(
        &mut self,
        modified_args: Map<String, Value>,
    ) -> Result<(), EngineError> {
        self.submit_decision(true, Some(modified_args)).await
    }

    async fn submit_decision(
        &mut self,
        approved: bool,
        modified_args: Option<Map<String, Value>>,
    ) -> Result<(), EngineError> {
        if self.state != RunState::Interrupted {
            return Err(EngineError::precondition("decide approval", self.state));
        }
        let Some(call) = self.gate.clear() else {
            return Err(EngineError::precondition(
                "decide without a pending approval",
                self.state,
            ));
        };
        self.publish();
        tracing::info!(
            thread_id = %self.thread_id,
            tool = %call.name,
            call_id = %call.id,
            approved,
            modified = modified_args.is_some(),
            "submitting approval decision"
        );
        let request = RunRequest::Resume {
            thread_id: self.thread_id.clone(),
            approved,
            modified_args,
        };
        self.open_run(request).await
    }
}
