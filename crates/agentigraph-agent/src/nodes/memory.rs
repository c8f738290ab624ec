//! Memory node: compacts the transcript when a budget is configured.

use crate::compactor::compact_messages;
use crate::config::{AgentEvent, EventSink};
use crate::skills::reindex_skills;
use crate::state::AgentState;
use agentigraph_core::{Node, Result};

pub struct MemoryNode {
    max_tokens: Option<usize>,
    events: EventSink,
}

impl MemoryNode {
    pub fn new(max_tokens: Option<usize>, events: EventSink) -> Self {
        Self { max_tokens, events }
    }
}

#[async_trait::async_trait]
impl Node<AgentState> for MemoryNode {
    async fn run(&self, mut state: AgentState) -> Result<AgentState> {
        let Some(max_tokens) = self.max_tokens else {
            return Ok(state);
        };
        let result = compact_messages(&state.messages, &state.skills, max_tokens)?;
        if !result.compacted {
            return Ok(state);
        }

        state.messages = result.messages;
        state.skills.retain(|s| !result.dropped_skills.contains(&s.name));
        reindex_skills(&mut state);

        self.events
            .emit(AgentEvent::Compacted {
                dropped_skills: result.dropped_skills,
                dropped_messages: result.dropped_messages,
                tokens_after: result.tokens_after,
            });
        Ok(state)
    }
}
