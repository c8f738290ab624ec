//! Skill injection: skills become droppable system messages right after the
//! first system message.

use crate::compactor::text_tokens;
use crate::state::{AgentState, InjectedSkill, InternalMessage, Skill};
use agentigraph_core::Role;
use tracing::debug;

fn render(skill: &Skill) -> String {
    let mut out = format!("# Skill: {}\n\n{}", skill.name, skill.content);
    if !skill.references.is_empty() {
        out.push_str("\n\nReferences:\n");
        for r in &skill.references {
            out.push_str("- ");
            out.push_str(r);
            out.push('\n');
        }
    }
    out
}

/// Insert `skills` (sorted by name) into `state`. No-op when the state
/// already carries injected skills, so resumed runs are not re-injected.
pub fn inject_skills(state: &mut AgentState, skills: &[Skill]) {
    if skills.is_empty() || !state.skills.is_empty() {
        return;
    }

    let mut sorted: Vec<&Skill> = skills.iter().collect();
    sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let insert_at = state
        .messages
        .iter()
        .position(|m| m.role() == Role::System)
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut injected = Vec::with_capacity(sorted.len());
    for (i, skill) in sorted.into_iter().enumerate() {
        let priority = i as u32;
        let message = InternalMessage::skill(&skill.name, render(skill), priority);
        let token_count = if skill.token_count > 0 {
            skill.token_count
        } else {
            text_tokens(&message.message.content)
        };
        state.messages.insert(insert_at + i, message);
        injected.push(InjectedSkill {
            name: skill.name.clone(),
            priority,
            message_index: insert_at + i,
            token_count,
        });
    }

    debug!(count = injected.len(), at = insert_at, "skills injected");
    state.skills = injected;
}

/// Re-point each skill at its message after the transcript changed shape.
pub fn reindex_skills(state: &mut AgentState) {
    let messages = &state.messages;
    state.skills.retain_mut(|skill| {
        match messages.iter().position(|m| m.meta.skill_id.as_deref() == Some(skill.name.as_str())) {
            Some(i) => {
                skill.message_index = i;
                true
            }
            None => false,
        }
    });
}
