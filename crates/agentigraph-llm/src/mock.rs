//! MockProvider: deterministic LLM responses for testing and offline runs
//!
//! Each call pops the next scripted behavior; an exhausted script falls back
//! to a default text response. Every request is recorded so tests can check
//! what actually reached the backend.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{Completion, LlmRequest, StreamDelta, Usage};
use agentigraph_core::ToolCall;
use async_stream::stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Mock behavior configuration
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Return a text-only response
    Text(String),
    /// Return a tool call with given name and args
    ToolCall { name: String, args: Value },
    /// Return multiple tool calls
    MultiToolCall(Vec<(String, Value)>),
    /// Return text followed by a tool call
    TextThenTool {
        text: String,
        tool_name: String,
        tool_args: Value,
    },
    /// Return a tool call whose argument text is passed through verbatim
    RawToolCall { name: String, arguments: String },
    /// Return an error
    Error(String),
}

/// Which entry point served a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallPath {
    Streaming,
    NonStreaming,
}

#[derive(Default)]
struct MockState {
    behaviors: VecDeque<MockBehavior>,
    requests: Vec<(CallPath, LlmRequest)>,
}

pub struct MockProvider {
    state: Mutex<MockState>,
    default_behavior: MockBehavior,
    usage_per_call: Usage,
}

impl MockProvider {
    /// Create a mock that always returns the same behavior
    pub fn constant(behavior: MockBehavior) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            default_behavior: behavior,
            usage_per_call: Usage { input_tokens: 10, output_tokens: 5 },
        }
    }

    /// Create a mock with a sequence of behaviors (consumed in order)
    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            state: Mutex::new(MockState {
                behaviors: behaviors.into(),
                requests: Vec::new(),
            }),
            default_behavior: MockBehavior::Text("(mock: sequence exhausted)".into()),
            usage_per_call: Usage { input_tokens: 10, output_tokens: 5 },
        }
    }

    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Requests received so far, with the path that served each.
    pub fn requests(&self) -> Vec<(CallPath, LlmRequest)> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the request and return its behavior plus the 1-based call number.
    fn next_behavior(&self, path: CallPath, request: LlmRequest) -> (MockBehavior, usize) {
        let mut state = self.lock();
        state.requests.push((path, request));
        let n = state.requests.len();
        let behavior = state
            .behaviors
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.clone());
        (behavior, n)
    }
}

fn tool_id(call: usize, index: usize) -> String {
    format!("toolu_mock_{}_{}", call, index)
}

/// Normalized (text, tool calls) for a behavior, or the scripted error.
fn script(behavior: MockBehavior, call: usize) -> LlmResult<(String, Vec<ToolCall>)> {
    let to_args = |v: &Value| serde_json::to_string(v).unwrap_or_default();
    Ok(match behavior {
        MockBehavior::Text(text) => (text, Vec::new()),
        MockBehavior::ToolCall { name, args } => {
            (String::new(), vec![ToolCall::new(tool_id(call, 0), name, to_args(&args))])
        }
        MockBehavior::MultiToolCall(tools) => (
            String::new(),
            tools
                .iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCall::new(tool_id(call, i), name.clone(), to_args(args)))
                .collect(),
        ),
        MockBehavior::TextThenTool { text, tool_name, tool_args } => (
            text,
            vec![ToolCall::new(tool_id(call, 0), tool_name, to_args(&tool_args))],
        ),
        MockBehavior::RawToolCall { name, arguments } => {
            (String::new(), vec![ToolCall::new(tool_id(call, 0), name, arguments)])
        }
        MockBehavior::Error(msg) => return Err(LlmError::RequestFailed(msg)),
    })
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> &[&str] {
        &["mock"]
    }

    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        if cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(LlmError::Cancelled);
        }
        let (behavior, n) = self.next_behavior(CallPath::Streaming, request);
        let usage = self.usage_per_call;
        let scripted = script(behavior, n);

        Ok(Box::pin(stream! {
            let (text, calls) = match scripted {
                Ok(parts) => parts,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            // Stream text in chunks like a real LLM
            for chunk in text.as_bytes().chunks(20) {
                yield Ok(StreamDelta::Text(String::from_utf8_lossy(chunk).to_string()));
            }
            let has_calls = !calls.is_empty();
            for call in calls {
                yield Ok(StreamDelta::ToolCallStart { id: call.id.clone(), name: call.name });
                yield Ok(StreamDelta::ToolCallDelta { id: call.id.clone(), arguments: call.arguments });
                yield Ok(StreamDelta::ToolCallEnd { id: call.id });
            }
            let stop_reason = if has_calls { "tool_use" } else { "end_turn" };
            yield Ok(StreamDelta::Done { stop_reason: Some(stop_reason.into()), usage: Some(usage) });
        }))
    }

    async fn complete(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<Completion> {
        if cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(LlmError::Cancelled);
        }
        let (behavior, n) = self.next_behavior(CallPath::NonStreaming, request);
        let (content, tool_calls) = script(behavior, n)?;
        let finish_reason = if tool_calls.is_empty() { "end_turn" } else { "tool_use" };
        Ok(Completion {
            content,
            reasoning_content: None,
            tool_calls,
            finish_reason: finish_reason.to_string(),
            usage: self.usage_per_call,
        })
    }
}
