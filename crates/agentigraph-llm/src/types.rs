//! LLM types for requests, streaming deltas and normalized completions

use agentigraph_core::{Message, Role, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Content given to the model in place of a tool result that never arrived.
pub const ORPHAN_RESULT_PLACEHOLDER: &str =
    "[no result recorded: the tool call was interrupted before it completed]";

/// LLM request
#[derive(Clone, Debug, Serialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            messages: Vec::new(),
            tools: None,
            max_tokens: Some(8192),
            temperature: None,
            top_p: None,
            response_format: None,
            tool_choice: None,
        }
    }
}

impl LlmRequest {
    /// Structured output must be fetched whole, never streamed.
    pub fn wants_structured_output(&self) -> bool {
        self.response_format
            .as_ref()
            .map(ResponseFormat::is_structured)
            .unwrap_or(false)
    }
}

/// Requested output format.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

impl ResponseFormat {
    pub fn is_structured(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Tool selection policy passed through to the backend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Tool(String),
}

/// Streaming delta from LLM
#[derive(Clone, Debug)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments: String },
    ToolCallEnd { id: String },
    Done { stop_reason: Option<String>, usage: Option<Usage> },
    Error(String),
}

/// Token usage
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;
    fn add(mut self, rhs: Self) -> Usage {
        self += rhs;
        self
    }
}

/// Accumulated tool call from streaming
#[derive(Clone, Debug, Default)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AccumulatedToolCall {
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }

    pub fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

/// A finished model turn, identical whether it came from a drained stream or
/// a single non-streamed response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Usage,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: "end_turn".to_string(),
            ..Default::default()
        }
    }

    /// The assistant message this completion appends to the transcript.
    pub fn to_message(&self) -> Message {
        Message::assistant_with_tools(self.content.clone(), self.tool_calls.clone())
    }
}

/// Make a transcript safe to send: every assistant tool call gets a result.
///
/// A call is answered by the first later tool message with its id that no
/// earlier call claimed. Unanswered calls receive a placeholder result, placed
/// after any results that directly follow the calling assistant turn.
pub fn heal_messages(messages: &[Message]) -> Vec<Message> {
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut healed = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        healed.push(msg.clone());
        i += 1;
        if msg.role != Role::Assistant || !msg.has_tool_calls() {
            continue;
        }
        let mut orphans: Vec<&ToolCall> = Vec::new();
        for call in msg.calls() {
            let result = (i..messages.len()).find(|j| {
                messages[*j].role == Role::Tool
                    && messages[*j].tool_call_id.as_deref() == Some(call.id.as_str())
                    && !claimed.contains(j)
            });
            match result {
                Some(j) => {
                    claimed.insert(j);
                }
                None => orphans.push(call),
            }
        }
        while i < messages.len() && messages[i].role == Role::Tool {
            healed.push(messages[i].clone());
            i += 1;
        }
        for call in orphans {
            tracing::debug!(call_id = %call.id, tool = %call.name, "healing orphan tool call");
            healed.push(Message::tool_result(&call.id, ORPHAN_RESULT_PLACEHOLDER));
        }
    }
    healed
}
