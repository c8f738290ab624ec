//! The generate boundary: guardrails around a graph run, then the memory hook.

use crate::checkpoint::CheckpointMetadata;
use crate::graph::{AgentGraph, RunOutcome};
use crate::state::AgentState;
use agentigraph_core::{Error, GuardrailVerdict, Message, Result, Role};
use agentigraph_llm::Usage;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailPhase {
    PreRequest,
    PostResponse,
}

impl fmt::Display for GuardrailPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreRequest => "pre-request",
            Self::PostResponse => "post-response",
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct GuardrailInput {
    pub content: String,
    pub agent_id: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GuardrailOutcome {
    pub should_proceed: bool,
    /// Possibly rewritten content.
    pub content: String,
    pub results: Vec<GuardrailVerdict>,
}

#[async_trait::async_trait]
pub trait Guardrails: Send + Sync {
    async fn execute(&self, phase: GuardrailPhase, input: &GuardrailInput) -> Result<GuardrailOutcome>;
}

/// Receives the finished transcript of a thread, e.g. for long-term summaries.
#[async_trait::async_trait]
pub trait MemoryHook: Send + Sync {
    async fn on_complete(&self, thread_id: &str, messages: &[Message]) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct GenerateOptions {
    /// With a thread and a checkpointer the run is resumable.
    pub thread_id: Option<String>,
    pub agent_id: Option<String>,
    pub guardrails: Option<Arc<dyn Guardrails>>,
    pub memory: Option<Arc<dyn MemoryHook>>,
}

#[derive(Clone, Debug)]
pub struct GenerateResult {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Usage,
    pub state: AgentState,
    /// Set when the run stopped for approval.
    pub suspended: Option<CheckpointMetadata>,
}

async fn guard(
    guardrails: &dyn Guardrails,
    phase: GuardrailPhase,
    input: GuardrailInput,
) -> Result<String> {
    let outcome = guardrails.execute(phase, &input).await?;
    if outcome.should_proceed {
        return Ok(outcome.content);
    }
    let reason = outcome
        .results
        .iter()
        .find(|v| !v.passed)
        .and_then(|v| v.message.clone().or_else(|| Some(format!("blocked by {}", v.guardrail))))
        .unwrap_or_else(|| "blocked".to_string());
    warn!(%phase, %reason, "guardrail blocked");
    Err(Error::GuardrailBlocked {
        phase: phase.to_string(),
        reason,
        verdicts: outcome.results,
    })
}

pub async fn generate_text_with_graph(
    graph: &AgentGraph,
    mut messages: Vec<Message>,
    options: GenerateOptions,
) -> Result<GenerateResult> {
    let input = |content: String| GuardrailInput {
        content,
        agent_id: options.agent_id.clone(),
        thread_id: options.thread_id.clone(),
    };

    if let Some(guardrails) = &options.guardrails {
        if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) {
            let content = std::mem::take(&mut last_user.content);
            last_user.content = guard(guardrails.as_ref(), GuardrailPhase::PreRequest, input(content)).await?;
        }
    }

    let (mut state, suspended) = match (&options.thread_id, graph.checkpointer()) {
        (Some(thread_id), Some(_)) => match graph.run_resumable(thread_id, messages).await? {
            RunOutcome::Suspended { state, checkpoint } => (state, Some(checkpoint)),
            RunOutcome::Completed { state, .. } => (state, None),
        },
        _ => (graph.invoke(messages).await?, None),
    };

    if suspended.is_none() {
        if let Some(guardrails) = &options.guardrails {
            let output = std::mem::take(&mut state.output);
            state.output = guard(guardrails.as_ref(), GuardrailPhase::PostResponse, input(output)).await?;
        }
        if let Some(memory) = &options.memory {
            let thread = options.thread_id.as_deref().unwrap_or("default");
            if let Err(e) = memory.on_complete(thread, &state.wire_messages()).await {
                warn!(thread, error = %e, "memory hook failed");
            }
        }
    }

    info!(steps = state.step_count, suspended = suspended.is_some(), "generate complete");
    Ok(GenerateResult {
        text: state.output.clone(),
        finish_reason: state.finish_reason.clone(),
        usage: state.usage,
        state,
        suspended,
    })
}
