use pretty_assertions::assert_eq;
use serde_json::{json, Map};

use super::*;
use crate::controller::RunState;
use crate::model::{Message, ThreadSnapshot, ToolCall};
use crate::test_support::{history_page, Call, FakeEngine};

fn ids(ledger: &CheckpointLedger) -> Vec<&str> {
    ledger
        .entries()
        .iter()
        .map(|entry| entry.checkpoint_id.as_str())
        .collect()
}

fn entry(index: u64, checkpoint_id: &str, parent: Option<&str>) -> Checkpoint {
    Checkpoint {
        index,
        checkpoint_id: checkpoint_id.to_owned(),
        parent_checkpoint_id: parent.map(ToOwned::to_owned),
        messages_count: 0,
        next: Vec::new(),
    }
}

#[test]
fn replace_orders_head_page_oldest_first() {
    let mut ledger = CheckpointLedger::default();
    ledger
        .replace(vec![
            entry(0, "cp_c", Some("cp_b")),
            entry(1, "cp_b", Some("cp_a")),
            entry(2, "cp_a", None),
        ])
        .expect("valid page");

    assert_eq!(ids(&ledger), vec!["cp_a", "cp_b", "cp_c"]);
    assert_eq!(
        ledger.latest().map(|entry| entry.checkpoint_id.as_str()),
        Some("cp_c")
    );
    let indices: Vec<u64> = ledger.entries().iter().map(|entry| entry.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn replace_ignores_arrival_order() {
    let mut ledger = CheckpointLedger::default();
    ledger
        .replace(vec![
            entry(2, "cp_a", None),
            entry(0, "cp_c", Some("cp_b")),
            entry(1, "cp_b", Some("cp_a")),
        ])
        .expect("valid page");
    assert_eq!(ids(&ledger), vec!["cp_a", "cp_b", "cp_c"]);
}

#[test]
fn replace_drops_abandoned_branch() {
    let mut ledger = CheckpointLedger::default();
    ledger
        .replace(vec![
            entry(0, "cp_d", Some("cp_b")),
            entry(1, "cp_c", Some("cp_b")),
            entry(2, "cp_b", Some("cp_a")),
            entry(3, "cp_a", None),
        ])
        .expect("valid page");
    assert_eq!(ids(&ledger), vec!["cp_a", "cp_b", "cp_d"]);
    assert_eq!(ledger.get("cp_c"), None);
}

#[test]
fn replace_stops_at_parent_outside_the_window() {
    let mut ledger = CheckpointLedger::default();
    ledger
        .replace(vec![
            entry(0, "cp_9", Some("cp_8")),
            entry(1, "cp_8", Some("cp_7")),
        ])
        .expect("valid page");
    assert_eq!(ids(&ledger), vec!["cp_8", "cp_9"]);
}

#[test]
fn replace_rejects_repeated_index_and_keeps_entries() {
    let mut ledger = CheckpointLedger::default();
    ledger.replace(history_page(&["a"])).expect("valid page");

    let err = ledger
        .replace(vec![entry(1, "x", None), entry(1, "y", None)])
        .expect_err("duplicate index");
    assert!(matches!(err, EngineError::Protocol(ref message) if message.contains("index 1")));
    assert_eq!(ids(&ledger), vec!["a"]);
}

#[test]
fn replace_rejects_repeated_checkpoint_id() {
    let mut ledger = CheckpointLedger::default();
    let err = ledger
        .replace(vec![entry(0, "x", Some("x")), entry(1, "x", None)])
        .expect_err("duplicate id");
    assert!(matches!(err, EngineError::Protocol(ref message) if message.contains("checkpoint x")));
    assert!(ledger.is_empty());
}

#[test]
fn fork_drops_descendants() {
    let mut ledger = CheckpointLedger::default();
    ledger
        .replace(history_page(&["cp_c", "cp_b", "cp_a"]))
        .expect("valid page");

    assert_eq!(ledger.fork_at("cp_b"), 1);
    assert_eq!(ids(&ledger), vec!["cp_a", "cp_b"]);
    assert_eq!(ledger.fork_point(), Some("cp_b"));

    assert_eq!(ledger.fork_at("zzz"), 0);
    assert_eq!(ids(&ledger), vec!["cp_a", "cp_b"]);
}

#[tokio::test]
async fn history_indices_increase_and_stay_stable() {
    let engine = FakeEngine::default();
    engine.set_history(history_page(&["cp_4", "cp_3", "cp_2"]));
    let mut controller = engine.controller();

    let first: Vec<(u64, String)> = controller
        .fetch_history()
        .await
        .expect("history")
        .iter()
        .map(|entry| (entry.index, entry.checkpoint_id.clone()))
        .collect();
    assert!(first.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(
        first.last().map(|(_, checkpoint_id)| checkpoint_id.as_str()),
        Some("cp_4")
    );

    let second: Vec<(u64, String)> = controller
        .fetch_history()
        .await
        .expect("history")
        .iter()
        .map(|entry| (entry.index, entry.checkpoint_id.clone()))
        .collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn history_fetch_uses_configured_limit() {
    let engine = FakeEngine::default();
    let mut controller =
        engine.controller_with(crate::config::EngineConfig::default().with_history_limit(3));

    controller.fetch_history().await.expect("history");
    assert_eq!(engine.calls(), vec![Call::History("thr_1".to_owned(), 3)]);
}

#[tokio::test]
async fn travel_is_read_only() {
    let engine = FakeEngine::default();
    engine.set_head(vec![Message::human("one"), Message::ai("two")], &[]);
    engine.set_history(history_page(&["cp_1", "cp_0"]));
    engine.set_checkpoint(
        "cp_0",
        ThreadSnapshot {
            messages: vec![Message::human("one")],
            next: vec!["agent".to_owned()],
            checkpoint_id: Some("cp_0".to_owned()),
        },
    );
    let mut controller = engine.controller();
    controller.refresh().await.expect("refresh");
    let ledger_before = controller.ledger().clone();
    engine.clear_calls();

    controller.travel("cp_0").await.expect("travel");

    assert!(engine.calls().iter().all(|call| !call.is_write()));
    assert_eq!(
        engine.calls(),
        vec![Call::CheckpointState("thr_1".to_owned(), "cp_0".to_owned())]
    );
    assert_eq!(controller.ledger(), &ledger_before);
    let view = controller.store().snapshot();
    assert_eq!(view.messages, vec![Message::human("one")]);
    assert_eq!(view.traveled_to.as_deref(), Some("cp_0"));
    assert_eq!(controller.state(), RunState::Idle);

    controller.return_to_head().await.expect("back to head");
    let view = controller.store().snapshot();
    assert!(!view.is_time_traveling());
    assert_eq!(view.messages.len(), 2);
}

#[tokio::test]
async fn travel_to_unknown_checkpoint_leaves_view() {
    let engine = FakeEngine::default();
    let mut controller = engine.controller();
    let before = controller.store().snapshot();

    let err = controller.travel("missing").await.expect_err("404");
    assert_eq!(
        err,
        EngineError::Server {
            status: Some(404),
            message: "Checkpoint not found".to_owned(),
        }
    );
    assert_eq!(controller.store().snapshot().version, before.version);
    assert_eq!(controller.state(), RunState::Idle);
}

fn search_call() -> ToolCall {
    let mut args = Map::new();
    args.insert("q".to_owned(), json!("x"));
    ToolCall::new("search", args, "1")
}

#[tokio::test]
async fn travel_while_approval_pending_discards_the_gate() {
    let engine = FakeEngine::default();
    engine.push_frames(&[json!({
        "event": "interrupt",
        "next": ["tools"],
        "pending_tool_call": {"name": "search", "args": {"q": "x"}, "id": "1"}
    })]);
    engine.set_checkpoint("cp_0", ThreadSnapshot::default());
    let mut controller = engine.controller();
    controller.invoke("go").await.expect("invoke");
    assert_eq!(controller.drive().await, Ok(RunState::Interrupted));
    assert!(controller.gate().is_armed());

    controller.travel("cp_0").await.expect("travel");

    assert!(!controller.gate().is_armed());
    assert_eq!(controller.state(), RunState::Interrupted);
    assert_eq!(controller.store().snapshot().run.pending_approval, None);
    let err = controller.decide(true).await.expect_err("nothing to decide");
    assert!(matches!(err, EngineError::Precondition { .. }));
}

#[tokio::test]
async fn return_to_head_rearms_pending_approval() {
    let engine = FakeEngine::default();
    engine.push_frames(&[json!({
        "event": "interrupt",
        "next": ["tools"],
        "pending_tool_call": {"name": "search", "args": {"q": "x"}, "id": "1"}
    })]);
    engine.set_head(
        vec![
            Message::human("go"),
            Message::Ai {
                content: String::new(),
                tool_calls: vec![search_call()],
            },
        ],
        &["tools"],
    );
    engine.set_checkpoint("cp_0", ThreadSnapshot::default());
    let mut controller = engine.controller();
    controller.invoke("go").await.expect("invoke");
    assert_eq!(controller.drive().await, Ok(RunState::Interrupted));

    controller.travel("cp_0").await.expect("travel");
    assert!(!controller.gate().is_armed());
    controller.return_to_head().await.expect("back to head");

    assert_eq!(controller.gate().pending(), Some(&search_call()));
    assert_eq!(
        controller.store().snapshot().run.pending_approval,
        Some(search_call())
    );
    engine.set_head(vec![Message::human("go"), Message::ai("found it")], &[]);
    engine.push_reply(json!({"status": "completed", "messages": []}));
    controller.decide(true).await.expect("decide");
    assert_eq!(controller.drive().await, Ok(RunState::Completed));
    assert_eq!(
        engine.run_requests().last(),
        Some(&RunRequest::Resume {
            thread_id: "thr_1".to_owned(),
            approved: true,
            modified_args: None,
        })
    );
}

#[tokio::test]
async fn resume_from_forks_and_refetches() {
    let engine = FakeEngine::default();
    engine.set_history(history_page(&["cp_2", "cp_1", "cp_0"]));
    let mut controller = engine.controller();
    controller.fetch_history().await.expect("history");

    engine.push_reply(json!({"status": "completed", "messages": [], "next": []}));
    engine.set_history(history_page(&["cp_9", "cp_1", "cp_0"]));
    controller
        .resume_from("cp_1", Some(json!({"messages": [{"type": "human", "content": "again"}]})))
        .await
        .expect("resume");

    assert_eq!(ids(controller.ledger()), vec!["cp_0", "cp_1"]);
    assert_eq!(controller.ledger().fork_point(), Some("cp_1"));
    assert_eq!(
        engine.run_requests(),
        vec![RunRequest::ResumeFromCheckpoint {
            thread_id: "thr_1".to_owned(),
            checkpoint_id: "cp_1".to_owned(),
            new_input: Some(json!({"messages": [{"type": "human", "content": "again"}]})),
        }]
    );

    assert_eq!(controller.drive().await, Ok(RunState::Completed));
    assert_eq!(ids(controller.ledger()), vec!["cp_0", "cp_1", "cp_9"]);
    assert_eq!(controller.ledger().fork_point(), None);
}
