//! Human-approval gate for tool calls.
//!
//! Resolution order: no approval required, auto-approved source pattern,
//! the tool's own handler, the global handler. With no handler at all the
//! gate fails closed.

use crate::registry::{RegisteredTool, ToolSource};
use agentigraph_core::{Result, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Denial reason used when a call needs approval and nobody can give it.
pub const NO_HANDLER_DENIAL: &str = "No handler configured for tool approval; execution denied.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
    /// Suspend the run until a human answers out of band.
    Defer,
}

impl ApprovalDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied { reason: reason.into() }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    pub tool_call: ToolCall,
    pub tool_name: String,
    pub args: Value,
    pub source: ToolSource,
}

#[async_trait::async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> Result<ApprovalDecision>;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> ApprovalHandler for FnHandler<F>
where
    F: Fn(ApprovalRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ApprovalDecision>> + Send,
{
    async fn decide(&self, request: &ApprovalRequest) -> Result<ApprovalDecision> {
        (self.0)(request.clone()).await
    }
}

pub fn approval_fn<F, Fut>(f: F) -> Arc<dyn ApprovalHandler>
where
    F: Fn(ApprovalRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApprovalDecision>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Clone, Default)]
pub struct ApprovalGate {
    auto_approve: Vec<String>,
    handler: Option<Arc<dyn ApprovalHandler>>,
}

impl ApprovalGate {
    pub fn new() -> Self { Self::default() }

    /// Approve every call from sources matching `pattern` (`type`, `type:*`, `type:ns`).
    pub fn auto_approve(mut self, pattern: impl Into<String>) -> Self {
        self.auto_approve.push(pattern.into());
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub async fn check(&self, tool: &RegisteredTool, request: &ApprovalRequest) -> ApprovalDecision {
        if !tool.requires_approval {
            return ApprovalDecision::Approved;
        }
        if self.auto_approve.iter().any(|p| tool.source.matches_pattern(p)) {
            debug!(tool = %tool.name, source = %tool.source, "auto-approved");
            return ApprovalDecision::Approved;
        }

        let Some(handler) = tool.approval_handler.as_ref().or(self.handler.as_ref()) else {
            warn!(tool = %tool.name, "approval required but no handler configured");
            return ApprovalDecision::denied(NO_HANDLER_DENIAL);
        };

        match handler.decide(request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "approval handler failed");
                ApprovalDecision::denied(format!("Approval handler error: {}", e))
            }
        }
    }
}
