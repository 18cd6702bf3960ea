use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::approvals::{pending_tool_call_in, ApprovalGate};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::events::{interpret_frame, MalformedFrame, StreamEvent};
use crate::ledger::CheckpointLedger;
use crate::model::Message;
use crate::sse::FrameReader;
use crate::store::{RunStatus, ThreadStateStore};
use crate::transport::{EngineTransport, RunBody, RunRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Sending,
    Running,
    Interrupted,
    Completing,
    Completed,
    Errored,
}

impl RunState {
    /// States during which a run owns the thread and no other write may start.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Sending | Self::Running | Self::Completing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag of one run session.
#[derive(Clone, Debug, Default)]
pub struct RunCancel(Arc<AtomicBool>);

impl RunCancel {
    /// Ask the owning controller to drop the run at its next step. Nothing is sent
    /// to the engine; the remote run may keep going unobserved.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result of pulling one frame (or reply) from the open run.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// The event was applied to the state machine.
    Applied(StreamEvent),
    /// A keep-alive or non-terminal malformed frame was skipped.
    Dropped(Option<MalformedFrame>),
    /// Transport failure or malformed terminal frame; the run is now `Errored`.
    Aborted(EngineError),
    /// No run is open.
    Idle,
}

enum EventSource {
    Frames(FrameReader),
    Reply(Option<StreamEvent>),
}

enum Pulled {
    Event(StreamEvent),
    Dropped(Option<MalformedFrame>),
    Fatal(EngineError),
}

struct RunSession {
    run_id: String,
    source: EventSource,
    cancel: RunCancel,
}

impl RunSession {
    fn new(body: RunBody) -> Self {
        let source = match body {
            RunBody::Events(stream) => EventSource::Frames(FrameReader::new(stream)),
            RunBody::Reply(reply) => EventSource::Reply(Some(reply.into_event())),
        };
        Self {
            run_id: new_run_id(),
            source,
            cancel: RunCancel::default(),
        }
    }

    async fn pull(&mut self) -> Pulled {
        let reader = match &mut self.source {
            EventSource::Reply(event) => {
                return Pulled::Event(event.take().unwrap_or_else(|| StreamEvent::Failed {
                    reason: "run reply already consumed".to_owned(),
                }));
            }
            EventSource::Frames(reader) => reader,
        };

        match reader.next_frame().await {
            None => Pulled::Event(StreamEvent::Failed {
                reason: "stream ended before a terminal event".to_owned(),
            }),
            // Undecodable frame mid-stream: the reader goes on.
            Some(Err(EngineError::Protocol(reason))) if !reader.is_exhausted() => {
                tracing::warn!(
                    run_id = %self.run_id,
                    reason = %reason,
                    "dropping undecodable frame"
                );
                Pulled::Dropped(Some(MalformedFrame {
                    event: None,
                    reason,
                }))
            }
            // Truncated tail: reported like an engine-side failure.
            Some(Err(EngineError::Protocol(reason))) => Pulled::Event(StreamEvent::Failed { reason }),
            Some(Err(err)) => Pulled::Fatal(err),
            Some(Ok(frame)) => match interpret_frame(&frame) {
                Ok(Some(event)) => Pulled::Event(event),
                Ok(None) => Pulled::Dropped(None),
                Err(malformed) if malformed.is_terminal() => Pulled::Fatal(malformed.into_error()),
                Err(malformed) => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        event = ?malformed.event,
                        reason = %malformed.reason,
                        "dropping malformed frame"
                    );
                    Pulled::Dropped(Some(malformed))
                }
            },
        }
    }
}

/// State machine for runs on one thread.
///
/// At most one run is open at a time; the guard is the controller's own state, not
/// a lock. Frames are pulled one at a time with [`RunController::step`] and applied
/// in arrival order.
pub struct RunController {
    pub(crate) transport: Arc<dyn EngineTransport>,
    pub(crate) config: EngineConfig,
    pub(crate) thread_id: String,
    pub(crate) state: RunState,
    session: Option<RunSession>,
    pub(crate) store: ThreadStateStore,
    pub(crate) ledger: CheckpointLedger,
    pub(crate) gate: ApprovalGate,
    current_node: Option<String>,
    last_error: Option<EngineError>,
}

impl RunController {
    pub fn new(
        transport: Arc<dyn EngineTransport>,
        thread_id: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        let thread_id = thread_id.into();
        Self {
            transport,
            config,
            store: ThreadStateStore::new(thread_id.clone()),
            thread_id,
            state: RunState::Idle,
            session: None,
            ledger: CheckpointLedger::default(),
            gate: ApprovalGate::default(),
            current_node: None,
            last_error: None,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Reader handle for the thread view; clone it into UI tasks.
    pub fn store(&self) -> &ThreadStateStore {
        &self.store
    }

    pub fn ledger(&self) -> &CheckpointLedger {
        &self.ledger
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    pub fn has_open_run(&self) -> bool {
        self.session.is_some()
    }

    /// Cancellation handle of the open run, if any.
    pub fn cancel_handle(&self) -> Option<RunCancel> {
        self.session.as_ref().map(|session| session.cancel.clone())
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            state: self.state,
            current_node: self.current_node.clone(),
            pending_approval: self.gate.pending().cloned(),
            last_error: self.last_error.clone(),
        }
    }

    /// Send a new user message. Rejected without any request while a run is in flight.
    /// Side effects: appends the message as a provisional overlay, then issues the run request.
    pub async fn invoke(&mut self, message: impl Into<String>) -> Result<(), EngineError> {
        self.ensure_not_in_flight("invoke")?;
        let message = message.into();
        self.store.append_provisional(Message::human(message.clone()));
        let request = RunRequest::Start {
            thread_id: self.thread_id.clone(),
            message,
            use_hitl: self.config.use_hitl,
            mode: self.config.run_mode,
        };
        self.open_run(request).await
    }

    /// Pull one frame from the open run and apply it.
    pub async fn step(&mut self) -> StepOutcome {
        let Some(session) = self.session.as_mut() else {
            return StepOutcome::Idle;
        };
        if session.cancel.is_cancelled() {
            self.abandon();
            return StepOutcome::Idle;
        }

        match session.pull().await {
            Pulled::Event(event) => {
                self.mark_running();
                self.apply(event.clone()).await;
                StepOutcome::Applied(event)
            }
            Pulled::Dropped(malformed) => {
                self.mark_running();
                StepOutcome::Dropped(malformed)
            }
            Pulled::Fatal(err) => {
                self.fail(err.clone()).await;
                StepOutcome::Aborted(err)
            }
        }
    }

    /// Step until the open run settles, then report where it landed.
    pub async fn drive(&mut self) -> Result<RunState, EngineError> {
        while self.step().await != StepOutcome::Idle {}
        match (self.state, &self.last_error) {
            (RunState::Errored, Some(err)) => Err(err.clone()),
            (state, _) => Ok(state),
        }
    }

    /// Re-read head state and history from the engine. While interrupted, a gate
    /// emptied by time travel is armed again from the head's pending tool call.
    pub async fn refresh(&mut self) -> Result<(), EngineError> {
        self.ensure_not_in_flight("refresh")?;
        self.refetch_authoritative().await?;
        if self.state == RunState::Interrupted && !self.gate.is_armed() {
            self.arm_from_head();
        }
        Ok(())
    }

    /// Write `updates` into the thread's head state, then re-read it. An edit made
    /// while interrupted replaces the pending approval with the edited tool call.
    pub async fn update_state(&mut self, updates: Map<String, Value>) -> Result<(), EngineError> {
        self.ensure_not_in_flight("update state")?;
        let keys: Vec<&str> = updates.keys().map(String::as_str).collect();
        tracing::info!(
            thread_id = %self.thread_id,
            keys = ?keys,
            "updating thread state"
        );
        self.transport.update_state(&self.thread_id, updates).await?;
        self.refetch_authoritative().await?;
        if self.state == RunState::Interrupted {
            self.gate.clear();
            self.arm_from_head();
        }
        Ok(())
    }

    /// Release the open run locally. No cancel is sent to the engine.
    pub fn abandon(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::info!(
            thread_id = %self.thread_id,
            run_id = %session.run_id,
            "abandoning run; the engine may finish it unobserved"
        );
        self.gate.clear();
        self.current_node = None;
        self.transition(RunState::Idle);
    }

    pub(crate) fn ensure_not_in_flight(&self, action: &'static str) -> Result<(), EngineError> {
        if self.state.is_in_flight() {
            tracing::debug!(
                thread_id = %self.thread_id,
                action,
                state = %self.state,
                "rejecting action while run is in flight"
            );
            return Err(EngineError::precondition(action, self.state));
        }
        Ok(())
    }

    /// Issue a run request and open its session.
    pub(crate) async fn open_run(&mut self, request: RunRequest) -> Result<(), EngineError> {
        self.gate.clear();
        self.current_node = None;
        self.last_error = None;
        self.transition(RunState::Sending);
        tracing::debug!(
            thread_id = %self.thread_id,
            kind = request.kind(),
            "opening run"
        );

        match self.transport.open_run(request).await {
            Ok(body) => {
                let session = RunSession::new(body);
                tracing::debug!(
                    thread_id = %self.thread_id,
                    run_id = %session.run_id,
                    "run opened"
                );
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    fn mark_running(&mut self) {
        if self.state == RunState::Sending {
            self.transition(RunState::Running);
        }
    }

    async fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::NodeStarted {
                node,
                message,
                fields,
            } => {
                self.current_node = Some(node.clone());
                self.store.record_node(&node, message, fields);
            }
            StreamEvent::Interrupted {
                next,
                pending_tool_call,
            } => {
                self.session = None;
                self.current_node = None;
                self.store.set_next(next);
                if let Some(call) = pending_tool_call {
                    self.gate.arm(call);
                }
                self.transition(RunState::Interrupted);
                if let Err(err) = self.refetch_authoritative().await {
                    tracing::warn!(
                        thread_id = %self.thread_id,
                        error = %err,
                        "refetch after interrupt failed; keeping local view"
                    );
                }
            }
            StreamEvent::Completed => {
                self.session = None;
                self.current_node = None;
                self.transition(RunState::Completing);
                match self.refetch_authoritative().await {
                    Ok(()) => self.settle_after_completion(),
                    Err(err) => self.fail(err).await,
                }
            }
            StreamEvent::Failed { reason } => {
                self.fail(EngineError::Server {
                    status: None,
                    message: reason,
                })
                .await;
            }
        }
    }

    /// The engine is the system of record: if it still reports pending nodes after a
    /// `complete` signal, the thread is paused, not finished.
    fn settle_after_completion(&mut self) {
        let view = self.store.snapshot();
        if view.next.is_empty() {
            self.transition(RunState::Completed);
            return;
        }
        tracing::info!(
            thread_id = %self.thread_id,
            next = ?view.next,
            "engine reports pending nodes after completion; settling as interrupted"
        );
        self.arm_from_head();
        self.transition(RunState::Interrupted);
    }

    /// Arm the gate from the head's trailing tool call while nodes are still pending.
    fn arm_from_head(&mut self) {
        let view = self.store.snapshot();
        if view.next.is_empty() {
            return;
        }
        if let Some(call) = pending_tool_call_in(&view.messages) {
            self.gate.arm(call);
        }
        self.publish();
    }

    async fn fail(&mut self, err: EngineError) {
        tracing::warn!(
            thread_id = %self.thread_id,
            state = %self.state,
            error = %err,
            "run failed"
        );
        self.session = None;
        self.current_node = None;
        self.gate.clear();
        self.last_error = Some(err);
        self.transition(RunState::Errored);
        if let Err(refresh_err) = self.refetch_history().await {
            tracing::debug!(
                thread_id = %self.thread_id,
                error = %refresh_err,
                "history refresh after failure failed"
            );
        }
    }

    /// Replace both the view and the ledger with engine truth.
    pub(crate) async fn refetch_authoritative(&mut self) -> Result<(), EngineError> {
        let snapshot = self.transport.thread_state(&self.thread_id).await?;
        self.refetch_history().await?;
        self.store.replace_authoritative(snapshot);
        self.publish();
        Ok(())
    }

    pub(crate) async fn refetch_history(&mut self) -> Result<(), EngineError> {
        let records = self
            .transport
            .thread_history(&self.thread_id, self.config.history_limit)
            .await?;
        self.ledger.replace(records)
    }

    pub(crate) fn transition(&mut self, next: RunState) {
        if self.state != next {
            tracing::debug!(
                thread_id = %self.thread_id,
                from = %self.state,
                to = %next,
                "run state transition"
            );
        }
        self.state = next;
        self.publish();
    }

    pub(crate) fn publish(&self) {
        self.store.publish_status(self.status());
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("thread_id", &self.thread_id)
            .field("state", &self.state)
            .field("open_run", &self.session.is_some())
            .field("gate", &self.gate)
            .finish()
    }
}

fn new_run_id() -> String {
    format!("run_{}", Uuid::new_v4())
}
