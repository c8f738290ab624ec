//! AgentGraph: skills -> predict -> tools -> memory -> predict ... on top of
//! the generic graph engine.

use crate::checkpoint::{resume_with_approval, CheckpointMetadata, Checkpointer, SaveOptions};
use crate::config::{AgentConfig, AgentEvent, EventSink};
use crate::nodes::{ApprovalMode, MemoryNode, PredictNode, SkillsNode, ToolsNode};
use crate::state::AgentState;
use agentigraph_core::{CompiledGraph, Error, Message, Next, Node, Result, Role, StateGraph};
use agentigraph_llm::LlmProvider;
use agentigraph_tools::{ApprovalGate, ToolMap};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

const SKILLS: &str = "skills";
const PREDICT: &str = "predict";
const TOOLS: &str = "tools";
const MEMORY: &str = "memory";
const CHECKPOINT: &str = "checkpoint";

/// Result of a resumable run.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    Completed {
        state: AgentState,
        checkpoint: CheckpointMetadata,
    },
    /// Waiting on a human; resume with [`AgentGraph::resume`].
    Suspended {
        state: AgentState,
        checkpoint: CheckpointMetadata,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &AgentState {
        match self {
            Self::Completed { state, .. } | Self::Suspended { state, .. } => state,
        }
    }

    pub fn into_state(self) -> AgentState {
        match self {
            Self::Completed { state, .. } | Self::Suspended { state, .. } => state,
        }
    }

    pub fn checkpoint(&self) -> &CheckpointMetadata {
        match self {
            Self::Completed { checkpoint, .. } | Self::Suspended { checkpoint, .. } => checkpoint,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// Saves the state after every completed step of a resumable run.
struct CheckpointNode {
    checkpointer: Arc<dyn Checkpointer>,
    thread_id: String,
    events: EventSink,
}

#[async_trait::async_trait]
impl Node<AgentState> for CheckpointNode {
    async fn run(&self, state: AgentState) -> Result<AgentState> {
        let meta = self.checkpointer.save(&self.thread_id, &state, SaveOptions::default()).await?;
        self.events
            .emit(AgentEvent::Checkpointed {
                id: meta.id,
                thread_id: self.thread_id.clone(),
                step_count: meta.step_count,
            });
        Ok(state)
    }
}

pub struct AgentGraph {
    provider: Arc<dyn LlmProvider>,
    tools: ToolMap,
    gate: ApprovalGate,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: Arc<AgentConfig>,
    events: EventSink,
}

impl AgentGraph {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolMap, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            gate: ApprovalGate::default(),
            checkpointer: None,
            config: Arc::new(config),
            events: EventSink::default(),
        }
    }

    /// A graph with no tools at all.
    pub fn without_tools(provider: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self::new(provider, Arc::new(BTreeMap::new()), config)
    }

    pub fn with_approval_gate(mut self, gate: ApprovalGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Stream run events to `tx`. Sends never block the run, so events are
    /// dropped while the channel is full.
    pub fn with_events(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolMap {
        &self.tools
    }

    pub fn checkpointer(&self) -> Option<&Arc<dyn Checkpointer>> {
        self.checkpointer.as_ref()
    }

    fn build(&self, resumable: Option<(&Arc<dyn Checkpointer>, &str)>) -> Result<CompiledGraph<AgentState>> {
        let mode = if resumable.is_some() { ApprovalMode::Resumable } else { ApprovalMode::Inline };
        let mut graph = StateGraph::new();
        graph
            .add_node(SKILLS, SkillsNode::new(self.config.skills.clone()))
            .add_node(PREDICT, PredictNode::new(self.provider.clone(), self.config.clone(), self.events.clone()))
            .add_node(TOOLS, ToolsNode::new(self.gate.clone(), mode, self.events.clone()))
            .add_node(MEMORY, MemoryNode::new(self.config.max_context_tokens, self.events.clone()))
            .set_entry_point(SKILLS)
            .add_edge(SKILLS, PREDICT)
            .add_conditional_edges(PREDICT, |s: &AgentState| {
                if s.done { Next::End } else { Next::to(TOOLS) }
            })
            .add_conditional_edges(TOOLS, |s: &AgentState| {
                if s.pending_approval.is_some() { Next::End } else { Next::to(MEMORY) }
            });

        match resumable {
            Some((checkpointer, thread_id)) => {
                graph
                    .add_node(
                        CHECKPOINT,
                        CheckpointNode {
                            checkpointer: checkpointer.clone(),
                            thread_id: thread_id.to_string(),
                            events: self.events.clone(),
                        },
                    )
                    .add_edge(MEMORY, CHECKPOINT)
                    .add_edge(CHECKPOINT, PREDICT);
            }
            None => {
                graph.add_edge(MEMORY, PREDICT);
            }
        }
        graph.compile()
    }

    /// Fresh state for `messages`, with the configured system prompt in front
    /// when the caller supplied none.
    pub fn initial_state(&self, messages: Vec<Message>) -> AgentState {
        let mut messages = messages;
        if let Some(prompt) = &self.config.system_prompt {
            if !messages.iter().any(|m| m.role == Role::System) {
                messages.insert(0, Message::system(prompt.clone()));
            }
        }
        AgentState::new(messages, self.tools.clone(), self.config.max_steps)
    }

    pub async fn invoke(&self, messages: Vec<Message>) -> Result<AgentState> {
        self.invoke_state(self.initial_state(messages)).await
    }

    /// Run to completion from a prepared state. Deferred approvals fail.
    pub async fn invoke_state(&self, state: AgentState) -> Result<AgentState> {
        info!(model = %self.config.model, tools = self.tools.len(), "agent invoke");
        self.build(None)?.invoke(state).await
    }

    fn require_checkpointer(&self) -> Result<&Arc<dyn Checkpointer>> {
        self.checkpointer
            .as_ref()
            .ok_or_else(|| Error::ConfigError("resumable runs need a checkpointer".into()))
    }

    /// Run with a checkpoint after every step. A deferred approval suspends
    /// the run and saves a pending-approval checkpoint.
    pub async fn run_resumable(&self, thread_id: &str, messages: Vec<Message>) -> Result<RunOutcome> {
        let checkpointer = self.require_checkpointer()?;
        info!(thread = %thread_id, model = %self.config.model, "resumable run");
        let graph = self.build(Some((checkpointer, thread_id)))?;
        let state = graph.invoke(self.initial_state(messages)).await?;
        self.finish(checkpointer, thread_id, state).await
    }

    /// Answer the pending approval of `thread_id` and continue the loop.
    pub async fn resume(&self, thread_id: &str, approved: bool) -> Result<RunOutcome> {
        let checkpointer = self.require_checkpointer()?;
        let checkpoint = checkpointer
            .load(thread_id)
            .await?
            .ok_or_else(|| Error::CheckpointNotFound(thread_id.to_string()))?;

        let executor = checkpoint
            .metadata
            .pending_approval
            .as_ref()
            .and_then(|p| self.tools.get(&p.tool_name))
            .and_then(|t| t.execute.clone());

        let outcome = resume_with_approval(&checkpoint, self.tools.clone(), approved, executor).await?;
        debug!(thread = %thread_id, executed = outcome.tool_executed, "approval consumed");

        // Mark the approval consumed before anything else can fail.
        checkpointer.save(thread_id, &outcome.state, SaveOptions::default()).await?;

        let graph = self.build(Some((checkpointer, thread_id)))?;
        let state = graph.invoke_from(TOOLS, outcome.state).await?;
        self.finish(checkpointer, thread_id, state).await
    }

    async fn finish(
        &self,
        checkpointer: &Arc<dyn Checkpointer>,
        thread_id: &str,
        mut state: AgentState,
    ) -> Result<RunOutcome> {
        match state.pending_approval.take() {
            Some(pending) => {
                let checkpoint = checkpointer.save(thread_id, &state, SaveOptions::pending(pending)).await?;
                info!(thread = %thread_id, id = %checkpoint.id, "run suspended for approval");
                Ok(RunOutcome::Suspended { state, checkpoint })
            }
            None => {
                let checkpoint = checkpointer.save(thread_id, &state, SaveOptions::default()).await?;
                info!(thread = %thread_id, steps = state.step_count, "resumable run complete");
                Ok(RunOutcome::Completed { state, checkpoint })
            }
        }
    }
}
