//! Tests for agentigraph-agent: skills, compaction, agent loop, approval, checkpoints, parallel branches

use agentigraph_agent::*;
use agentigraph_core::{Error, GuardrailVerdict, Message, Role, ToolCall};
use agentigraph_llm::{CallPath, MockBehavior, MockProvider, ResponseFormat, ORPHAN_RESULT_PLACEHOLDER};
use agentigraph_tools::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn counting_tool(name: &str, counter: Arc<AtomicUsize>) -> RegisteredTool {
    RegisteredTool::new(name, "test tool", json!({"type": "object"}), ToolSource::user()).with_executor(tool_fn(
        move |args, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ToolResult::Json(args))
            }
        },
    ))
}

fn tool_map(tools: Vec<RegisteredTool>) -> ToolMap {
    let mut registry = ToolRegistry::new();
    registry.register_all(tools).unwrap();
    registry.to_tool_map()
}

fn empty_tools() -> ToolMap {
    ToolRegistry::new().to_tool_map()
}

fn skill(name: &str, content: &str) -> Skill {
    Skill { name: name.into(), content: content.into(), ..Default::default() }
}

fn tool_messages(state: &AgentState) -> Vec<&Message> {
    state.messages.iter().map(|m| &m.message).filter(|m| m.role == Role::Tool).collect()
}

fn call(name: &str, args: serde_json::Value) -> MockBehavior {
    MockBehavior::ToolCall { name: name.into(), args }
}

// ===========================================================================
// Skill injection
// ===========================================================================

#[test]
fn skills_injected_sorted_after_first_system() {
    let mut state = AgentState::new(vec![Message::system("sys"), Message::user("hi")], empty_tools(), 10);
    inject_skills(&mut state, &[skill("zebra", "z"), skill("alpha", "a"), skill("middle", "m")]);

    let layout: Vec<String> = state
        .messages
        .iter()
        .map(|m| m.meta.skill_id.clone().unwrap_or_else(|| format!("{:?}", m.role()).to_lowercase()))
        .collect();
    assert_eq!(layout, vec!["system", "alpha", "middle", "zebra", "user"]);

    let priorities: Vec<_> = state.skills.iter().map(|s| (s.name.as_str(), s.priority, s.message_index)).collect();
    assert_eq!(priorities, vec![("alpha", 0, 1), ("middle", 1, 2), ("zebra", 2, 3)]);
    assert!(state.messages[1].meta.droppable);
}

#[test]
fn skills_without_system_message_go_first() {
    let mut state = AgentState::new(vec![Message::user("hi")], empty_tools(), 10);
    inject_skills(&mut state, &[skill("b", "b"), skill("a", "a")]);
    assert_eq!(state.messages[0].meta.skill_id.as_deref(), Some("a"));
    assert_eq!(state.messages[2].role(), Role::User);
}

#[test]
fn skill_injection_is_idempotent() {
    let mut state = AgentState::new(vec![Message::user("hi")], empty_tools(), 10);
    inject_skills(&mut state, &[skill("a", "a")]);
    inject_skills(&mut state, &[skill("a", "a")]);
    assert_eq!(state.messages.len(), 2);
}

// ===========================================================================
// Compaction
// ===========================================================================

#[test]
fn compaction_keeps_tool_pair_and_last_user() {
    let messages: Vec<InternalMessage> = vec![
        Message::system("sys"),
        Message::user("q".repeat(400)),
        Message::assistant_with_tools("", vec![ToolCall::new("a", "read", "{}")]),
        Message::tool_result("a", "r".repeat(400)),
        Message::assistant("x".repeat(400)),
        Message::user("last"),
    ]
    .into_iter()
    .map(InternalMessage::from)
    .collect();

    let result = compact_messages(&messages, &[], 150).unwrap();
    assert!(result.compacted);
    assert!(result.tokens_after <= 150);
    let kept: Vec<&Message> = result.messages.iter().map(|m| &m.message).collect();
    assert_eq!(kept.len(), 4);
    assert_eq!(kept[0].role, Role::System);
    assert_eq!(kept[1].calls()[0].id, "a");
    assert_eq!(kept[2].tool_call_id.as_deref(), Some("a"));
    assert_eq!(kept[3].content, "last");
    assert_eq!(result.dropped_messages, 2);
}

#[test]
fn lower_priority_skill_dropped_first() {
    let mut state = AgentState::new(vec![Message::system("sys"), Message::user("hi")], empty_tools(), 10);
    inject_skills(&mut state, &[skill("alpha", &"a".repeat(400)), skill("beta", &"b".repeat(400))]);
    let budget = estimate_tokens(&state.messages) - 50;

    let result = compact_messages(&state.messages, &state.skills, budget).unwrap();
    assert_eq!(result.dropped_skills, vec!["alpha".to_string()]);
    assert!(result
        .messages
        .iter()
        .any(|m| m.meta.skill_id.as_deref() == Some("beta")));
}

#[test]
fn orphan_calls_are_reported_and_kept() {
    let messages: Vec<InternalMessage> = vec![
        Message::user("q".repeat(400)),
        Message::assistant_with_tools("", vec![ToolCall::new("lost", "read", "{}")]),
        Message::user("again"),
    ]
    .into_iter()
    .map(InternalMessage::from)
    .collect();
    let result = compact_messages(&messages, &[], 40).unwrap();
    assert_eq!(result.orphan_ids, vec!["lost".to_string()]);
    assert_eq!(result.messages.len(), 2);
}

#[test]
fn reused_call_id_keeps_each_result_with_its_call() {
    let messages: Vec<InternalMessage> = vec![
        Message::user("go"),
        Message::assistant_with_tools("", vec![ToolCall::new("x", "t", "{}")]),
        Message::tool_result("x", "r1"),
        Message::assistant_with_tools("", vec![ToolCall::new("x", "t", "{}")]),
        Message::tool_result("x", "z".repeat(800)),
        Message::user("next"),
    ]
    .into_iter()
    .map(InternalMessage::from)
    .collect();

    let pairs = build_tool_pairs(&messages);
    assert_eq!(pairs[0].result_message_index, Some(2));
    assert_eq!(pairs[1].result_message_index, Some(4));

    // The second result is protected, so it cannot be evicted to fit.
    assert!(matches!(
        compact_messages(&messages, &[], 80),
        Err(Error::ContextOverflow { .. })
    ));

    let result = compact_messages(&messages, &[], 260).unwrap();
    let calls = result.messages.iter().filter(|m| m.message.has_tool_calls()).count();
    let results = result.messages.iter().filter(|m| m.role() == Role::Tool).count();
    assert_eq!((calls, results), (2, 2));
    assert_eq!(result.dropped_messages, 1);
}

#[test]
fn compaction_exhaustion_overflows() {
    let messages: Vec<InternalMessage> = vec![Message::system("s".repeat(400)), Message::user("hi")]
        .into_iter()
        .map(InternalMessage::from)
        .collect();
    match compact_messages(&messages, &[], 50) {
        Err(Error::ContextOverflow { current_tokens, max_tokens, recommendation }) => {
            assert!(current_tokens > max_tokens);
            assert_eq!(max_tokens, 50);
            assert!(!recommendation.is_empty());
        }
        other => panic!("expected ContextOverflow, got {:?}", other),
    }
}

// ===========================================================================
// Agent loop
// ===========================================================================

#[tokio::test]
async fn text_only_turn_finishes() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text("hello".into())));
    let graph = AgentGraph::without_tools(mock.clone(), AgentConfig::default());
    let state = graph.invoke(vec![Message::user("hi")]).await.unwrap();
    assert!(state.done);
    assert_eq!(state.output, "hello");
    assert_eq!(state.step_count, 1);
    assert_eq!(state.messages.last().unwrap().role(), Role::Assistant);
    assert_eq!(mock.requests()[0].0, CallPath::Streaming);
}

#[tokio::test]
async fn tool_round_trip_appends_results() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(MockProvider::sequence(vec![
        call("echo", json!({"x": 1})),
        MockBehavior::Text("done".into()),
    ]));
    let graph = AgentGraph::new(mock.clone(), tool_map(vec![counting_tool("echo", counter.clone())]), AgentConfig::default());
    let state = graph.invoke(vec![Message::user("go")]).await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let results = tool_messages(&state);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, r#"{"x":1}"#);
    assert_eq!(state.step_count, 2);
    assert_eq!(state.usage.total(), 30);
    assert!(state.steps.iter().any(|s| matches!(s, StepResult::ToolCall { .. })));
    assert!(state.steps.iter().any(|s| matches!(s, StepResult::ToolResult { is_error: false, .. })));
    assert_eq!(mock.requests()[1].1.tools.as_ref().unwrap()[0].name, "echo");
}

#[tokio::test]
async fn unknown_tool_becomes_error_result() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(MockProvider::sequence(vec![call("missing", json!({})), MockBehavior::Text("ok".into())]));
    let graph = AgentGraph::new(mock, tool_map(vec![counting_tool("echo", counter)]), AgentConfig::default());
    let state = graph.invoke(vec![Message::user("go")]).await.unwrap();
    assert_eq!(tool_messages(&state)[0].content, "Tool not found: missing");
}

#[tokio::test]
async fn unparseable_arguments_reach_tool_raw() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::RawToolCall { name: "echo".into(), arguments: "not json at all".into() },
        MockBehavior::Text("ok".into()),
    ]));
    let graph = AgentGraph::new(mock, tool_map(vec![counting_tool("echo", counter)]), AgentConfig::default());
    let state = graph.invoke(vec![Message::user("go")]).await.unwrap();
    let content = &tool_messages(&state)[0].content;
    assert!(content.contains(RAW_ARGUMENTS_KEY));
    assert!(content.contains("not json at all"));
}

#[tokio::test]
async fn failing_tool_is_data_fatal_tool_aborts() {
    let failing = RegisteredTool::new("flaky", "", json!({}), ToolSource::user())
        .with_executor(tool_fn(|_, _| async { Err(ToolError::Failed("timeout".into())) }));
    let mock = Arc::new(MockProvider::sequence(vec![call("flaky", json!({})), MockBehavior::Text("ok".into())]));
    let state = AgentGraph::new(mock, tool_map(vec![failing]), AgentConfig::default())
        .invoke(vec![Message::user("go")])
        .await
        .unwrap();
    assert_eq!(tool_messages(&state)[0].content, "Error: timeout");

    let fatal = RegisteredTool::new("disk", "", json!({}), ToolSource::user())
        .with_executor(tool_fn(|_, _| async { Err(ToolError::Fatal("disk gone".into())) }));
    let mock = Arc::new(MockProvider::constant(call("disk", json!({}))));
    let err = AgentGraph::new(mock, tool_map(vec![fatal]), AgentConfig::default())
        .invoke(vec![Message::user("go")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FatalTool { ref name, .. } if name == "disk"));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn max_steps_exceeded_is_fatal() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(MockProvider::constant(call("echo", json!({}))));
    let config = AgentConfig { max_steps: 2, ..Default::default() };
    let err = AgentGraph::new(mock, tool_map(vec![counting_tool("echo", counter.clone())]), config)
        .invoke(vec![Message::user("loop")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MaxStepsExceeded { step_count: 3, max_steps: 2 }));
    assert!(err.is_fatal());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn structured_output_uses_non_streaming_path() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text(r#"{"answer":42}"#.into())));
    let config = AgentConfig { response_format: Some(ResponseFormat::Json), ..Default::default() };
    let state = AgentGraph::without_tools(mock.clone(), config)
        .invoke(vec![Message::user("json please")])
        .await
        .unwrap();
    assert_eq!(state.output, r#"{"answer":42}"#);
    assert_eq!(mock.requests()[0].0, CallPath::NonStreaming);
}

#[tokio::test]
async fn annotations_never_reach_the_model() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text("ok".into())));
    let config = AgentConfig {
        system_prompt: Some("be brief".into()),
        skills: vec![skill("alpha", "use alpha")],
        ..Default::default()
    };
    AgentGraph::without_tools(mock.clone(), config)
        .invoke(vec![Message::user("hi")])
        .await
        .unwrap();

    let request = &mock.requests()[0].1;
    assert_eq!(request.messages[0].content, "be brief");
    assert!(request.messages[1].content.contains("# Skill: alpha"));
    let wire = serde_json::to_string(&request.messages).unwrap();
    assert!(!wire.contains("_meta"));
    assert!(!wire.contains("skillId"));
}

#[tokio::test]
async fn orphan_calls_are_healed_outbound_only() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text("ok".into())));
    let graph = AgentGraph::without_tools(mock.clone(), AgentConfig::default());
    let state = graph.initial_state(vec![
        Message::user("go"),
        Message::assistant_with_tools("", vec![ToolCall::new("x", "read", "{}")]),
        Message::user("continue"),
    ]);
    let out = graph.invoke_state(state).await.unwrap();

    let sent = &mock.requests()[0].1.messages;
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[2].content, ORPHAN_RESULT_PLACEHOLDER);
    assert!(tool_messages(&out).is_empty());
}

#[tokio::test]
async fn cancelled_state_stops_before_predict() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text("never".into())));
    let graph = AgentGraph::without_tools(mock.clone(), AgentConfig::default());
    let state = graph.initial_state(vec![Message::user("hi")]);
    state.cancel.cancel();
    assert!(matches!(graph.invoke_state(state).await, Err(Error::Cancelled)));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn memory_node_compacts_between_steps() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(MockProvider::sequence(vec![call("echo", json!({})), MockBehavior::Text("ok".into())]));
    let config = AgentConfig {
        skills: vec![skill("big", &"s".repeat(2000))],
        max_context_tokens: Some(200),
        ..Default::default()
    };
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let state = AgentGraph::new(mock, tool_map(vec![counting_tool("echo", counter)]), config)
        .with_events(tx)
        .invoke(vec![Message::user("hi")])
        .await
        .unwrap();

    assert!(state.skills.is_empty());
    assert!(state.messages.iter().all(|m| m.meta.skill_id.is_none()));
    let mut compacted = false;
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::Compacted { dropped_skills, .. } = event {
            compacted = dropped_skills == vec!["big".to_string()];
        }
    }
    assert!(compacted);
}

#[tokio::test]
async fn events_stream_tool_lifecycle() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::TextThenTool { text: "checking".into(), tool_name: "echo".into(), tool_args: json!({}) },
        MockBehavior::Text("done".into()),
    ]));
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    AgentGraph::new(mock, tool_map(vec![counting_tool("echo", counter)]), AgentConfig::default())
        .with_events(tx)
        .invoke(vec![Message::user("go")])
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    assert!(events.contains(&AgentEvent::Text("checking".into())));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolExecuting { name, .. } if name == "echo")));
    assert!(matches!(events.last(), Some(AgentEvent::Done { .. })));
}

#[tokio::test]
async fn full_event_channel_does_not_stall_the_run() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::TextThenTool { text: "checking".into(), tool_name: "echo".into(), tool_args: json!({}) },
        MockBehavior::Text("done".into()),
    ]));
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let graph = AgentGraph::new(mock, tool_map(vec![counting_tool("echo", counter.clone())]), AgentConfig::default())
        .with_events(tx);
    let run = graph.invoke(vec![Message::user("go")]);
    let state = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

    assert!(state.done);
    assert_eq!(state.output, "done");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(rx.try_recv().unwrap(), AgentEvent::Text("checking".into()));
    assert!(rx.try_recv().is_err());
}

// ===========================================================================
// Approval
// ===========================================================================

#[tokio::test]
async fn approval_fails_closed_without_handler() {
    let counter = Arc::new(AtomicUsize::new(0));
    let guarded = counting_tool("deploy", counter.clone()).with_approval(true);
    let mock = Arc::new(MockProvider::sequence(vec![call("deploy", json!({})), MockBehavior::Text("ok".into())]));
    let state = AgentGraph::new(mock, tool_map(vec![guarded]), AgentConfig::default())
        .invoke(vec![Message::user("ship")])
        .await
        .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    let result = &tool_messages(&state)[0].content;
    assert!(result.contains(NO_HANDLER_DENIAL));
}

#[tokio::test]
async fn inline_defer_is_an_error() {
    let counter = Arc::new(AtomicUsize::new(0));
    let guarded = counting_tool("deploy", counter.clone()).with_approval(true);
    let gate = ApprovalGate::new().with_handler(approval_fn(|_| async { Ok(ApprovalDecision::Defer) }));
    let mock = Arc::new(MockProvider::constant(call("deploy", json!({}))));
    let err = AgentGraph::new(mock, tool_map(vec![guarded]), AgentConfig::default())
        .with_approval_gate(gate)
        .invoke(vec![Message::user("ship")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ApprovalDeferUnsupported { ref tool_name } if tool_name == "deploy"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

fn deferring_graph(counter: Arc<AtomicUsize>) -> (AgentGraph, Arc<MemoryCheckpointer>) {
    let guarded = counting_tool("deploy", counter).with_approval(true);
    let gate = ApprovalGate::new().with_handler(approval_fn(|_| async { Ok(ApprovalDecision::Defer) }));
    let mock = Arc::new(MockProvider::sequence(vec![
        call("deploy", json!({"env": "prod"})),
        MockBehavior::Text("finished".into()),
    ]));
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let graph = AgentGraph::new(mock, tool_map(vec![guarded]), AgentConfig::default())
        .with_approval_gate(gate)
        .with_checkpointer(checkpointer.clone());
    (graph, checkpointer)
}

#[tokio::test]
async fn pending_approval_reject_executes_nothing() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (graph, checkpointer) = deferring_graph(counter.clone());

    let outcome = graph.run_resumable("t1", vec![Message::user("ship")]).await.unwrap();
    assert!(outcome.is_suspended());
    let pending = checkpointer.load("t1").await.unwrap().unwrap();
    assert_eq!(pending.metadata.status, CheckpointStatus::PendingApproval);
    assert_eq!(pending.metadata.pending_approval.as_ref().unwrap().tool_name, "deploy");

    let resumed = graph.resume("t1", false).await.unwrap();
    assert!(!resumed.is_suspended());
    let results = tool_messages(resumed.state());
    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("rejected"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(resumed.state().output, "finished");

    let again = graph.resume("t1", true).await.unwrap_err();
    assert!(matches!(again, Error::NotPendingApproval(_)));
}

#[tokio::test]
async fn pending_approval_approve_executes_once() {
    let counter = Arc::new(AtomicUsize::new(0));
    let (graph, _) = deferring_graph(counter.clone());

    graph.run_resumable("t2", vec![Message::user("ship")]).await.unwrap();
    let resumed = graph.resume("t2", true).await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let results = tool_messages(resumed.state());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, r#"{"env":"prod"}"#);
    assert_eq!(resumed.checkpoint().status, CheckpointStatus::Active);
}

#[tokio::test]
async fn resume_with_approval_without_executor_uses_placeholder() {
    let checkpointer = MemoryCheckpointer::new();
    let call = ToolCall::new("c1", "deploy", "{}");
    let mut state = AgentState::new(vec![Message::user("go")], empty_tools(), 10);
    state.push(Message::assistant_with_tools("", vec![call.clone()]));
    let pending = PendingApproval {
        tool_call: call,
        tool_name: "deploy".into(),
        args: json!({}),
        requested_at: chrono::Utc::now(),
    };
    checkpointer.save("t", &state, SaveOptions::pending(pending)).await.unwrap();
    let checkpoint = checkpointer.load("t").await.unwrap().unwrap();

    let outcome = resume_with_approval(&checkpoint, empty_tools(), true, None).await.unwrap();
    assert!(!outcome.tool_executed);
    assert_eq!(tool_messages(&outcome.state)[0].content, "Tool execution approved: deploy");
}

// ===========================================================================
// Checkpointer
// ===========================================================================

fn sample_state() -> AgentState {
    let mut state = AgentState::new(vec![Message::system("sys"), Message::user("hi")], empty_tools(), 10);
    inject_skills(&mut state, &[skill("alpha", "a")]);
    state.step_count = 3;
    state.output = "answer".into();
    state
}

#[tokio::test]
async fn memory_checkpoint_round_trip() {
    let cp = MemoryCheckpointer::new();
    let state = sample_state();
    let meta = cp.save("thread", &state, SaveOptions::default()).await.unwrap();
    assert_eq!(meta.status, CheckpointStatus::Active);
    assert_eq!(meta.step_count, 3);

    let restored = cp.load("thread").await.unwrap().unwrap().restore_state(empty_tools());
    assert_eq!(restored.step_count, 3);
    assert_eq!(restored.output, "answer");
    assert_eq!(restored.messages, state.messages);
    assert_eq!(restored.messages[1].meta.skill_id.as_deref(), Some("alpha"));
    assert!(!restored.cancel.is_cancelled());
}

#[tokio::test]
async fn file_checkpoint_round_trip_and_meta_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cp = FileCheckpointer::new(dir.path());
    let mut state = sample_state();
    state.cancel.cancel();

    cp.save("thread/1", &state, SaveOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    state.step_count = 4;
    let latest = cp.save("thread/1", &state, SaveOptions::default()).await.unwrap();

    let loaded = cp.load("thread/1").await.unwrap().unwrap();
    assert_eq!(loaded.metadata.id, latest.id);
    let restored = loaded.restore_state(empty_tools());
    assert_eq!(restored.step_count, 4);
    assert_eq!(restored.messages, state.messages);
    assert!(!restored.cancel.is_cancelled());

    let raw = serde_json::to_string(&loaded).unwrap();
    assert!(raw.contains("\"_meta\""));
    assert!(raw.contains("\"skillId\":\"alpha\""));

    let listed = cp.list("thread/1").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, latest.id);
    assert!(cp.delete(&latest.id).await.unwrap());
    assert_eq!(cp.clear("thread/1").await.unwrap(), 1);
    assert!(cp.load("thread/1").await.unwrap().is_none());
}

#[tokio::test]
async fn file_checkpoint_threads_with_similar_names_stay_apart() {
    let dir = tempfile::tempdir().unwrap();
    let cp = FileCheckpointer::new(dir.path());
    let state = sample_state();
    cp.save("team/a", &state, SaveOptions::default()).await.unwrap();
    cp.save("team/a", &state, SaveOptions::default()).await.unwrap();
    let other = cp.save("team_a", &state, SaveOptions::default()).await.unwrap();

    assert!(dir.path().join("team_2Fa").is_dir());
    assert!(dir.path().join("team_5Fa").is_dir());
    assert_eq!(cp.clear("team/a").await.unwrap(), 2);

    let left = cp.list("team_a").await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, other.id);
    let loaded = cp.load("team_a").await.unwrap().unwrap();
    assert_eq!(loaded.metadata.thread_id, "team_a");
}

#[tokio::test]
async fn checkpoint_list_delete_clear() {
    let cp = MemoryCheckpointer::new();
    let state = sample_state();
    let a = cp.save("t", &state, SaveOptions::default()).await.unwrap();
    let b = cp.save("t", &state, SaveOptions::default()).await.unwrap();
    let c = cp.save("t", &state, SaveOptions::default()).await.unwrap();

    let ids: Vec<_> = cp.list("t").await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![c.id.clone(), b.id.clone(), a.id.clone()]);
    assert!(cp.delete(&b.id).await.unwrap());
    assert!(!cp.delete(&b.id).await.unwrap());
    assert_eq!(cp.clear("t").await.unwrap(), 2);
    assert_eq!(cp.clear("t").await.unwrap(), 0);
}

#[tokio::test]
async fn legacy_custom_map_options() {
    let cp = MemoryCheckpointer::new();
    let mut custom = serde_json::Map::new();
    custom.insert("label".into(), json!("nightly"));
    let meta = cp.save("t", &sample_state(), custom.into()).await.unwrap();
    assert_eq!(meta.status, CheckpointStatus::Active);
    assert_eq!(meta.custom.unwrap()["label"], "nightly");
}

// ===========================================================================
// Parallel branches
// ===========================================================================

fn parallel_base() -> AgentState {
    let mut state = AgentState::new(vec![Message::user("fan out")], empty_tools(), 10);
    state.step_count = 1;
    state
}

/// Each branch logs `s<i>` on start and `e<i>` on finish. Lower indexes sleep longer.
fn recording_branches(events: Arc<Mutex<Vec<String>>>) -> Vec<Branch> {
    (0..3)
        .map(|i| {
            let events = events.clone();
            branch(move |mut state: AgentState| async move {
                events.lock().unwrap().push(format!("s{}", i));
                tokio::time::sleep(Duration::from_millis((3 - i as u64) * 10)).await;
                events.lock().unwrap().push(format!("e{}", i));
                state.push(Message::assistant(format!("branch {}", i)));
                state.step_count += 1;
                state.usage.output_tokens += 5;
                state.output = format!("out {}", i);
                state.done = true;
                Ok(state)
            })
        })
        .collect()
}

#[tokio::test]
async fn parallel_single_concurrency_runs_in_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let merged = ParallelExecutor::new()
        .max_concurrency(1)
        .execute(&parallel_base(), recording_branches(events.clone()))
        .await
        .unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["s0", "e0", "s1", "e1", "s2", "e2"]);
    assert_eq!(merged.messages.len(), 4);
}

#[tokio::test]
async fn parallel_unbounded_branches_overlap() {
    let events = Arc::new(Mutex::new(Vec::new()));
    ParallelExecutor::new()
        .execute(&parallel_base(), recording_branches(events.clone()))
        .await
        .unwrap();
    let events = events.lock().unwrap().clone();
    assert_eq!(events[..3], ["s0", "s1", "s2"]);
    let pos = |e: &str| events.iter().position(|x| x == e).unwrap();
    assert!(pos("e2") < pos("e0"));
}

#[tokio::test]
async fn parallel_merge_is_deterministic() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let base = parallel_base();
    let merged = ParallelExecutor::new()
        .execute(&base, recording_branches(events))
        .await
        .unwrap();

    let contents: Vec<&str> = merged.messages.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, vec!["fan out", "branch 0", "branch 1", "branch 2"]);
    assert!(merged.messages.iter().all(|m| m.meta.branch_index.is_none() && m.meta.local_index.is_none()));
    assert_eq!(merged.step_count, 3);
    assert_eq!(merged.usage.output_tokens, 15);
    assert!(merged.done);
    assert_eq!(merged.output, "out 0\n\nout 1\n\nout 2");
}

#[tokio::test]
async fn parallel_usage_sums_branch_counters() {
    let mut base = parallel_base();
    base.usage.input_tokens = 100;
    let branches: Vec<Branch> = (0..2)
        .map(|_| {
            branch(|mut state: AgentState| async move {
                state.usage.input_tokens += 10;
                Ok(state)
            })
        })
        .collect();
    let merged = ParallelExecutor::new().execute(&base, branches).await.unwrap();
    assert_eq!(merged.usage.input_tokens, 220);
    assert_eq!(merged.usage.output_tokens, 0);
}

#[tokio::test]
async fn parallel_fatal_error_fails_fast() {
    let started = Instant::now();
    let branches = vec![
        branch(|state: AgentState| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(state)
        }),
        branch(|_state: AgentState| async move { Err(Error::fatal_tool("disk", "volume gone")) }),
    ];
    let err = ParallelExecutor::new().execute(&parallel_base(), branches).await.unwrap_err();
    assert!(matches!(err, Error::FatalTool { ref name, .. } if name == "disk"));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn parallel_non_fatal_reports_lowest_index() {
    let branches = vec![
        branch(|state: AgentState| async move { Ok(state) }),
        branch(|_state: AgentState| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(Error::Internal("branch 1".into()))
        }),
        branch(|_state: AgentState| async move { Err(Error::Internal("branch 2".into())) }),
    ];
    let err = ParallelExecutor::new().execute(&parallel_base(), branches).await.unwrap_err();
    assert!(matches!(err, Error::Internal(ref m) if m == "branch 1"));
}

// ===========================================================================
// Generate boundary
// ===========================================================================

struct BlockEverything;

#[async_trait::async_trait]
impl Guardrails for BlockEverything {
    async fn execute(&self, _phase: GuardrailPhase, input: &GuardrailInput) -> agentigraph_core::Result<GuardrailOutcome> {
        Ok(GuardrailOutcome {
            should_proceed: false,
            content: input.content.clone(),
            results: vec![GuardrailVerdict {
                guardrail: "pii".into(),
                passed: false,
                message: Some("contains secrets".into()),
            }],
        })
    }
}

struct Shout;

#[async_trait::async_trait]
impl Guardrails for Shout {
    async fn execute(&self, phase: GuardrailPhase, input: &GuardrailInput) -> agentigraph_core::Result<GuardrailOutcome> {
        let content = match phase {
            GuardrailPhase::PreRequest => input.content.clone(),
            GuardrailPhase::PostResponse => input.content.to_uppercase(),
        };
        Ok(GuardrailOutcome { should_proceed: true, content, results: vec![] })
    }
}

#[derive(Default)]
struct RecordingMemory(Mutex<Vec<(String, usize)>>);

#[async_trait::async_trait]
impl MemoryHook for RecordingMemory {
    async fn on_complete(&self, thread_id: &str, messages: &[Message]) -> agentigraph_core::Result<()> {
        self.0.lock().unwrap().push((thread_id.to_string(), messages.len()));
        Ok(())
    }
}

#[tokio::test]
async fn guardrail_block_stops_before_model() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text("never".into())));
    let graph = AgentGraph::without_tools(mock.clone(), AgentConfig::default());
    let options = GenerateOptions { guardrails: Some(Arc::new(BlockEverything)), ..Default::default() };
    let err = generate_text_with_graph(&graph, vec![Message::user("my password is hunter2")], options)
        .await
        .unwrap_err();
    match err {
        Error::GuardrailBlocked { phase, reason, verdicts } => {
            assert_eq!(phase, "pre-request");
            assert_eq!(reason, "contains secrets");
            assert_eq!(verdicts.len(), 1);
        }
        other => panic!("expected GuardrailBlocked, got {:?}", other),
    }
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn generate_rewrites_output_and_feeds_memory() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Text("quiet answer".into())));
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let graph = AgentGraph::without_tools(mock, AgentConfig::default()).with_checkpointer(checkpointer.clone());
    let memory = Arc::new(RecordingMemory::default());
    let options = GenerateOptions {
        thread_id: Some("conv-9".into()),
        guardrails: Some(Arc::new(Shout)),
        memory: Some(memory.clone()),
        ..Default::default()
    };
    let result = generate_text_with_graph(&graph, vec![Message::user("hi")], options).await.unwrap();

    assert_eq!(result.text, "QUIET ANSWER");
    assert!(result.suspended.is_none());
    assert_eq!(*memory.0.lock().unwrap(), vec![("conv-9".to_string(), 2)]);
    assert!(checkpointer.load("conv-9").await.unwrap().is_some());
}
