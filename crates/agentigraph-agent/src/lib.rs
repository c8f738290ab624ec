//! Agentigraph Agent: the agent graph, its nodes, compaction, checkpoints
//! and parallel branches.

pub mod checkpoint;
pub mod compactor;
pub mod config;
pub mod generate;
pub mod graph;
pub mod nodes;
pub mod parallel;
pub mod skills;
pub mod state;

pub use checkpoint::{
    resume_with_approval, Checkpoint, CheckpointMetadata, CheckpointStatus, Checkpointer,
    FileCheckpointer, MemoryCheckpointer, ResumeOutcome, SaveOptions,
};
pub use compactor::{build_tool_pairs, compact_messages, estimate_tokens, CompactionResult, ToolPair};
pub use config::{AgentConfig, AgentEvent};
pub use generate::{
    generate_text_with_graph, GenerateOptions, GenerateResult, GuardrailInput, GuardrailOutcome,
    GuardrailPhase, Guardrails, MemoryHook,
};
pub use graph::{AgentGraph, RunOutcome};
pub use parallel::{branch, fork_state, Branch, DefaultReducer, ParallelExecutor, Reducer};
pub use skills::inject_skills;
pub use state::{
    AgentState, AgentStateSnapshot, InjectedSkill, InternalMessage, MessageMeta, PendingApproval, Skill,
    StepResult,
};
