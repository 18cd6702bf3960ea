use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::controller::RunController;
use crate::errors::EngineError;
use crate::model::{Checkpoint, Message, ThreadSnapshot};
use crate::transport::{EngineTransport, RunBody, RunReply, RunRequest, TransportFuture};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    CreateThread(Option<String>),
    State(String),
    History(String, usize),
    CheckpointState(String, String),
    UpdateState(String, Map<String, Value>),
    Run(RunRequest),
}

impl Call {
    pub(crate) fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateThread(_) | Self::UpdateState(..) | Self::Run(_)
        )
    }
}

pub(crate) enum ScriptedRun {
    Chunks(Vec<Result<Vec<u8>, EngineError>>),
    Reply(RunReply),
}

#[derive(Default)]
pub(crate) struct FakeEngineState {
    pub(crate) calls: Vec<Call>,
    pub(crate) head: ThreadSnapshot,
    pub(crate) history: Vec<Checkpoint>,
    pub(crate) checkpoints: HashMap<String, ThreadSnapshot>,
    pub(crate) runs: VecDeque<Result<ScriptedRun, EngineError>>,
    pub(crate) state_error: Option<EngineError>,
    /// Head served after the next state update, as the engine would have written it.
    pub(crate) updated_head: Option<ThreadSnapshot>,
}

/// Scripted engine: records every call and serves canned runs in order.
#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    pub(crate) state: Arc<Mutex<FakeEngineState>>,
}

impl FakeEngine {
    pub(crate) fn controller(&self) -> RunController {
        self.controller_with(EngineConfig::default())
    }

    pub(crate) fn controller_with(&self, config: EngineConfig) -> RunController {
        RunController::new(Arc::new(self.clone()), "thr_1", config)
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, FakeEngineState> {
        self.state.lock().expect("fake engine state lock")
    }

    /// Queue an SSE run whose frames arrive as one chunk.
    pub(crate) fn push_frames(&self, payloads: &[Value]) {
        let body: String = payloads
            .iter()
            .map(|payload| format!("data: {payload}\n\n"))
            .collect();
        self.push_chunks(vec![Ok(body.into_bytes())]);
    }

    pub(crate) fn push_chunks(&self, chunks: Vec<Result<Vec<u8>, EngineError>>) {
        self.lock().runs.push_back(Ok(ScriptedRun::Chunks(chunks)));
    }

    pub(crate) fn push_reply(&self, reply: Value) {
        let reply: RunReply = serde_json::from_value(reply).expect("valid run reply");
        self.lock().runs.push_back(Ok(ScriptedRun::Reply(reply)));
    }

    pub(crate) fn push_run_error(&self, err: EngineError) {
        self.lock().runs.push_back(Err(err));
    }

    pub(crate) fn set_head(&self, messages: Vec<Message>, next: &[&str]) {
        self.lock().head = ThreadSnapshot {
            messages,
            next: next.iter().map(|node| (*node).to_owned()).collect(),
            checkpoint_id: Some("cp_head".to_owned()),
        };
    }

    /// Head the engine shows once an update lands.
    pub(crate) fn on_update(&self, messages: Vec<Message>, next: &[&str]) {
        self.lock().updated_head = Some(ThreadSnapshot {
            messages,
            next: next.iter().map(|node| (*node).to_owned()).collect(),
            checkpoint_id: Some("cp_updated".to_owned()),
        });
    }

    pub(crate) fn set_history(&self, history: Vec<Checkpoint>) {
        self.lock().history = history;
    }

    pub(crate) fn set_checkpoint(&self, checkpoint_id: &str, snapshot: ThreadSnapshot) {
        self.lock()
            .checkpoints
            .insert(checkpoint_id.to_owned(), snapshot);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn run_requests(&self) -> Vec<RunRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Run(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl EngineTransport for FakeEngine {
    fn create_thread<'a>(
        &'a self,
        thread_id: Option<&'a str>,
    ) -> TransportFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            self.lock()
                .calls
                .push(Call::CreateThread(thread_id.map(ToOwned::to_owned)));
            Ok(thread_id.unwrap_or("thr_created").to_owned())
        })
    }

    fn thread_state<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> TransportFuture<'a, Result<ThreadSnapshot, EngineError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::State(thread_id.to_owned()));
            match state.state_error.clone() {
                Some(err) => Err(err),
                None => Ok(state.head.clone()),
            }
        })
    }

    fn thread_history<'a>(
        &'a self,
        thread_id: &'a str,
        limit: usize,
    ) -> TransportFuture<'a, Result<Vec<Checkpoint>, EngineError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::History(thread_id.to_owned(), limit));
            Ok(state.history.clone())
        })
    }

    fn checkpoint_state<'a>(
        &'a self,
        thread_id: &'a str,
        checkpoint_id: &'a str,
    ) -> TransportFuture<'a, Result<ThreadSnapshot, EngineError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::CheckpointState(
                thread_id.to_owned(),
                checkpoint_id.to_owned(),
            ));
            state
                .checkpoints
                .get(checkpoint_id)
                .cloned()
                .ok_or_else(|| EngineError::Server {
                    status: Some(404),
                    message: "Checkpoint not found".to_owned(),
                })
        })
    }

    fn update_state<'a>(
        &'a self,
        thread_id: &'a str,
        updates: Map<String, Value>,
    ) -> TransportFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .calls
                .push(Call::UpdateState(thread_id.to_owned(), updates));
            if let Some(head) = state.updated_head.take() {
                state.head = head;
            }
            Ok(())
        })
    }

    fn open_run<'a>(
        &'a self,
        request: RunRequest,
    ) -> TransportFuture<'a, Result<RunBody, EngineError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::Run(request));
            let scripted = state
                .runs
                .pop_front()
                .expect("a scripted run for every run request")?;
            Ok(match scripted {
                ScriptedRun::Chunks(chunks) => RunBody::Events(stream::iter(chunks).boxed()),
                ScriptedRun::Reply(reply) => RunBody::Reply(reply),
            })
        })
    }
}

/// A history page as the engine serves it: newest first, index 0 at the head,
/// each entry linked to the next older one.
pub(crate) fn history_page(newest_first: &[&str]) -> Vec<Checkpoint> {
    newest_first
        .iter()
        .enumerate()
        .map(|(index, checkpoint_id)| Checkpoint {
            index: index as u64,
            checkpoint_id: (*checkpoint_id).to_owned(),
            parent_checkpoint_id: newest_first.get(index + 1).map(|parent| (*parent).to_owned()),
            messages_count: newest_first.len() - index,
            next: Vec::new(),
        })
        .collect()
}
