//! The agent's graph nodes.

pub mod memory;
pub mod predict;
pub mod tools;

pub use memory::MemoryNode;
pub use predict::PredictNode;
pub use tools::{ApprovalMode, ToolsNode, CANCELLED_RESULT, MAX_RESULT_CHARS};

use crate::skills::inject_skills;
use crate::state::{AgentState, Skill};
use agentigraph_core::{Node, Result};

/// Runs once at the start of a fresh invocation.
pub struct SkillsNode {
    skills: Vec<Skill>,
}

impl SkillsNode {
    pub fn new(skills: Vec<Skill>) -> Self {
        Self { skills }
    }
}

#[async_trait::async_trait]
impl Node<AgentState> for SkillsNode {
    async fn run(&self, mut state: AgentState) -> Result<AgentState> {
        inject_skills(&mut state, &self.skills);
        Ok(state)
    }
}
