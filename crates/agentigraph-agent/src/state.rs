//! Agent state carried through the graph.

use agentigraph_core::{Message, Role, ToolCall};
use agentigraph_llm::Usage;
use agentigraph_tools::ToolMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Internal-only annotations. Never sent to the model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, rename = "skillId", skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub droppable: bool,
    /// Lower evicts first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, rename = "branchIndex", skip_serializing_if = "Option::is_none")]
    pub branch_index: Option<usize>,
    #[serde(default, rename = "localIndex", skip_serializing_if = "Option::is_none")]
    pub local_index: Option<usize>,
}

impl MessageMeta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn clear_branch(&mut self) {
        self.branch_index = None;
        self.local_index = None;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InternalMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, rename = "_meta", skip_serializing_if = "MessageMeta::is_empty")]
    pub meta: MessageMeta,
}

impl InternalMessage {
    pub fn new(message: Message) -> Self {
        Self { message, meta: MessageMeta::default() }
    }

    /// A droppable system message carrying one skill.
    pub fn skill(name: impl Into<String>, content: impl Into<String>, priority: u32) -> Self {
        Self {
            message: Message::system(content),
            meta: MessageMeta {
                skill_id: Some(name.into()),
                droppable: true,
                priority: Some(priority),
                ..Default::default()
            },
        }
    }

    pub fn role(&self) -> Role {
        self.message.role
    }
}

impl From<Message> for InternalMessage {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedSkill {
    pub name: String,
    pub priority: u32,
    pub message_index: usize,
    pub token_count: usize,
}

/// A skill as handed over by the skill provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub references: Vec<String>,
    /// Zero means "estimate it".
    #[serde(default)]
    pub token_count: usize,
}

/// One observable unit of progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    Text {
        step: usize,
        content: String,
        finish_reason: String,
    },
    ToolCall {
        step: usize,
        call: ToolCall,
    },
    ToolResult {
        step: usize,
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

/// A tool call waiting on a human. Consumed once by the resume path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub tool_call: ToolCall,
    pub tool_name: String,
    pub args: Value,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct AgentState {
    pub messages: Vec<InternalMessage>,
    pub skills: Vec<InjectedSkill>,
    pub tools: ToolMap,
    pub step_count: usize,
    pub max_steps: usize,
    pub done: bool,
    pub output: String,
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Usage,
    pub steps: Vec<StepResult>,
    pub pending_approval: Option<PendingApproval>,
    pub cancel: CancellationToken,
}

impl AgentState {
    pub fn new(messages: Vec<Message>, tools: ToolMap, max_steps: usize) -> Self {
        Self {
            messages: messages.into_iter().map(InternalMessage::new).collect(),
            skills: Vec::new(),
            tools,
            step_count: 0,
            max_steps,
            done: false,
            output: String::new(),
            reasoning: None,
            finish_reason: None,
            usage: Usage::default(),
            steps: Vec::new(),
            pending_approval: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(InternalMessage::new(message));
    }

    /// The transcript as the model sees it: annotations stripped.
    pub fn wire_messages(&self) -> Vec<Message> {
        self.messages.iter().map(|m| m.message.clone()).collect()
    }

    /// Index of the most recent assistant message.
    pub fn last_assistant_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role() == Role::Assistant)
    }

    pub fn snapshot(&self) -> AgentStateSnapshot {
        AgentStateSnapshot {
            messages: self.messages.clone(),
            skills: self.skills.clone(),
            step_count: self.step_count,
            max_steps: self.max_steps,
            done: self.done,
            output: self.output.clone(),
            reasoning: self.reasoning.clone(),
            finish_reason: self.finish_reason.clone(),
            usage: self.usage,
            steps: self.steps.clone(),
        }
    }
}

/// Serializable form of [`AgentState`]: no tools, no cancel token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStateSnapshot {
    pub messages: Vec<InternalMessage>,
    #[serde(default)]
    pub skills: Vec<InjectedSkill>,
    pub step_count: usize,
    pub max_steps: usize,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub steps: Vec<StepResult>,
}

impl AgentStateSnapshot {
    /// Rebuild a live state. The tool map must be supplied by the caller and
    /// the cancel token is always fresh.
    pub fn restore(&self, tools: ToolMap) -> AgentState {
        AgentState {
            messages: self.messages.clone(),
            skills: self.skills.clone(),
            tools,
            step_count: self.step_count,
            max_steps: self.max_steps,
            done: self.done,
            output: self.output.clone(),
            reasoning: self.reasoning.clone(),
            finish_reason: self.finish_reason.clone(),
            usage: self.usage,
            steps: self.steps.clone(),
            pending_approval: None,
            cancel: CancellationToken::new(),
        }
    }
}
