//! Agent configuration and the event stream emitted while a run progresses.

use crate::state::Skill;
use agentigraph_llm::{ResponseFormat, ToolChoice};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub max_steps: usize,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
    pub tool_choice: Option<ToolChoice>,
    /// Compaction budget. `None` disables the memory node.
    pub max_context_tokens: Option<usize>,
    pub skills: Vec<Skill>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_steps: 25,
            system_prompt: None,
            temperature: None,
            top_p: None,
            max_tokens: Some(8192),
            response_format: None,
            tool_choice: None,
            max_context_tokens: None,
            skills: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    Text(String),
    Thinking(String),
    ToolExecuting {
        id: String,
        name: String,
    },
    ToolResult {
        id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    ApprovalRequested {
        id: String,
        name: String,
    },
    Compacted {
        dropped_skills: Vec<String>,
        dropped_messages: usize,
        tokens_after: usize,
    },
    Checkpointed {
        id: String,
        thread_id: String,
        step_count: usize,
    },
    Done {
        stop_reason: String,
    },
    Error(String),
}

/// Optional sender shared by every node of a run.
#[derive(Clone, Debug, Default)]
pub struct EventSink(Option<mpsc::Sender<AgentEvent>>);

impl EventSink {
    pub fn new(tx: mpsc::Sender<AgentEvent>) -> Self {
        Self(Some(tx))
    }

    /// Never waits: with the channel full the event is dropped and logged.
    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.0 {
            if let Err(TrySendError::Full(event)) = tx.try_send(event) {
                debug!(?event, "event channel full, dropping event");
            }
        }
    }
}
