//! Error types for Agentigraph

use crate::types::GuardrailVerdict;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("max steps exceeded: step {step_count} would pass the budget of {max_steps}")]
    MaxStepsExceeded { step_count: usize, max_steps: usize },

    #[error("context overflow: {current_tokens} tokens exceeds budget of {max_tokens}. {recommendation}")]
    ContextOverflow {
        current_tokens: usize,
        max_tokens: usize,
        recommendation: String,
    },

    #[error("fatal tool error: {name} - {message}")]
    FatalTool { name: String, message: String },

    #[error("tool conflict: '{name}' already registered from {existing}, refusing {incoming}")]
    ToolConflict {
        name: String,
        existing: String,
        incoming: String,
    },

    #[error("approval for tool '{tool_name}' was deferred, which requires a resumable run")]
    ApprovalDeferUnsupported { tool_name: String },

    #[error("guardrail blocked {phase}: {reason}")]
    GuardrailBlocked {
        phase: String,
        reason: String,
        verdicts: Vec<GuardrailVerdict>,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("no checkpoint for thread: {0}")]
    CheckpointNotFound(String),

    #[error("checkpoint {0} is not pending approval")]
    NotPendingApproval(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("unknown graph node: {0}")]
    UnknownNode(String),

    #[error("llm error: {provider} - {message}")]
    LlmError { provider: String, message: String },

    #[error("tool error: {name} - {message}")]
    ToolError { name: String, message: String },

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn llm_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn tool_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn fatal_tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FatalTool {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn context_overflow(current_tokens: usize, max_tokens: usize) -> Self {
        Self::ContextOverflow {
            current_tokens,
            max_tokens,
            recommendation: "Reduce the number of skills, shorten the system prompt, \
                             or raise the context budget, then retry from scratch."
                .to_string(),
        }
    }

    /// Errors that terminate an in-flight invocation and short-circuit
    /// parallel branches.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MaxStepsExceeded { .. } | Self::ContextOverflow { .. } | Self::FatalTool { .. }
        )
    }
}
