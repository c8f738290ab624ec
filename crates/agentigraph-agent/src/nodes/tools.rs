//! Tools node: answers every tool call of the last assistant turn.
//!
//! Calls that already have a result are skipped, which is what lets a
//! resumed run pick up after the call that was waiting on approval.

use crate::config::{AgentEvent, EventSink};
use crate::state::{AgentState, PendingApproval, StepResult};
use agentigraph_core::{Error, Message, Node, Result, Role, ToolCall};
use agentigraph_tools::{
    parse_tool_arguments, ApprovalDecision, ApprovalGate, ApprovalRequest, ToolContext, ToolError,
    ToolExecutor,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Results longer than this are cut before they reach the transcript.
pub const MAX_RESULT_CHARS: usize = 50000;

pub const CANCELLED_RESULT: &str = "Tool execution cancelled";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalMode {
    /// Deferred approval is an error.
    Inline,
    /// Deferred approval suspends the run.
    Resumable,
}

pub(crate) fn truncate_result(content: String) -> String {
    let total = content.chars().count();
    if total <= MAX_RESULT_CHARS {
        return content;
    }
    let head: String = content.chars().take(MAX_RESULT_CHARS).collect();
    format!("{}...\n[truncated, {} total chars]", head, total)
}

/// Run one executor. Non-fatal failures come back as error content.
pub(crate) async fn run_executor(
    executor: &Arc<dyn ToolExecutor>,
    tool_name: &str,
    args: Value,
    ctx: ToolContext,
) -> Result<(String, bool)> {
    match executor.execute(args, ctx).await {
        Ok(result) => Ok((truncate_result(result.to_content_string()), result.is_error())),
        Err(ToolError::Failed(msg)) => Ok((format!("Error: {}", msg), true)),
        Err(ToolError::Fatal(msg)) => Err(Error::fatal_tool(tool_name, msg)),
    }
}

pub(crate) fn record_result(state: &mut AgentState, call: &ToolCall, content: String, is_error: bool) {
    state.steps.push(StepResult::ToolResult {
        step: state.step_count,
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        content: content.clone(),
        is_error,
    });
    state.push(Message::tool_result(&call.id, content));
}

pub struct ToolsNode {
    gate: ApprovalGate,
    mode: ApprovalMode,
    events: EventSink,
}

impl ToolsNode {
    pub fn new(gate: ApprovalGate, mode: ApprovalMode, events: EventSink) -> Self {
        Self { gate, mode, events }
    }

    fn finish(&self, state: &mut AgentState, call: &ToolCall, content: String, is_error: bool) {
        self.events
            .emit(AgentEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                result: content.clone(),
                is_error,
            });
        record_result(state, call, content, is_error);
    }
}

#[async_trait::async_trait]
impl Node<AgentState> for ToolsNode {
    async fn run(&self, mut state: AgentState) -> Result<AgentState> {
        let Some(idx) = state.last_assistant_index() else {
            return Ok(state);
        };
        let calls: Vec<ToolCall> = state.messages[idx].message.calls().to_vec();
        let answered: HashSet<String> = state.messages[idx + 1..]
            .iter()
            .filter(|m| m.role() == Role::Tool)
            .filter_map(|m| m.message.tool_call_id.clone())
            .collect();

        for call in calls.iter().filter(|c| !answered.contains(&c.id)) {
            if state.cancel.is_cancelled() {
                debug!(tool = %call.name, "cancelled before execution");
                self.finish(&mut state, call, CANCELLED_RESULT.to_string(), true);
                continue;
            }

            state.steps.push(StepResult::ToolCall { step: state.step_count, call: call.clone() });

            let Some(tool) = state.tools.get(&call.name).cloned() else {
                warn!(tool = %call.name, "model called an unknown tool");
                self.finish(&mut state, call, format!("Tool not found: {}", call.name), true);
                continue;
            };

            let parsed = parse_tool_arguments(&call.arguments);
            let args = parsed.into_value();

            let request = ApprovalRequest {
                tool_call: call.clone(),
                tool_name: call.name.clone(),
                args: args.clone(),
                source: tool.source.clone(),
            };
            match self.gate.check(&tool, &request).await {
                ApprovalDecision::Approved => {}
                ApprovalDecision::Denied { reason } => {
                    warn!(tool = %call.name, %reason, "tool call denied");
                    let content = format!("Tool execution denied: {}", reason);
                    self.finish(&mut state, call, content, true);
                    continue;
                }
                ApprovalDecision::Defer => match self.mode {
                    ApprovalMode::Inline => {
                        return Err(Error::ApprovalDeferUnsupported { tool_name: call.name.clone() });
                    }
                    ApprovalMode::Resumable => {
                        debug!(tool = %call.name, id = %call.id, "approval deferred, suspending");
                        self.events.emit(AgentEvent::ApprovalRequested { id: call.id.clone(), name: call.name.clone() });
                        state.pending_approval = Some(PendingApproval {
                            tool_call: call.clone(),
                            tool_name: call.name.clone(),
                            args,
                            requested_at: chrono::Utc::now(),
                        });
                        return Ok(state);
                    }
                },
            }

            let Some(executor) = tool.execute.as_ref() else {
                self.finish(&mut state, call, format!("Tool '{}' has no executor", call.name), true);
                continue;
            };

            self.events.emit(AgentEvent::ToolExecuting { id: call.id.clone(), name: call.name.clone() });
            let ctx = ToolContext {
                tool_call_id: call.id.clone(),
                messages: state.wire_messages(),
                cancel: state.cancel.clone(),
            };
            let (content, is_error) = run_executor(executor, &call.name, args, ctx).await?;
            self.finish(&mut state, call, content, is_error);
        }

        Ok(state)
    }
}
