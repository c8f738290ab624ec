//! Context compaction with a fixed eviction order.
//!
//! Protected: non-droppable system messages, both halves of every tool pair
//! and the last user message. Droppable messages go first (lowest priority,
//! then skill order), then the oldest unprotected messages. If that still
//! does not fit, the run fails with a context overflow.

use crate::state::{InjectedSkill, InternalMessage};
use agentigraph_core::{Error, Message, Result, Role};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

const CHARS_PER_TOKEN: f32 = 4.0;
const MESSAGE_OVERHEAD_TOKENS: usize = 10;

pub fn text_tokens(text: &str) -> usize {
    (text.len() as f32 / CHARS_PER_TOKEN).ceil() as usize
}

pub fn message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .calls()
        .iter()
        .map(|c| text_tokens(&c.name) + text_tokens(&c.arguments))
        .sum();
    text_tokens(&message.content) + calls + MESSAGE_OVERHEAD_TOKENS
}

pub fn estimate_tokens(messages: &[InternalMessage]) -> usize {
    messages.iter().map(|m| message_tokens(&m.message)).sum()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPair {
    pub call_message_index: usize,
    pub call_id: String,
    /// `None` for an orphan call.
    pub result_message_index: Option<usize>,
}

impl ToolPair {
    pub fn is_orphan(&self) -> bool {
        self.result_message_index.is_none()
    }
}

/// One pair per tool call, in call order. A call pairs with the first later
/// tool message carrying its id that no earlier call has claimed.
pub fn build_tool_pairs(messages: &[InternalMessage]) -> Vec<ToolPair> {
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut pairs = Vec::new();
    for (i, m) in messages.iter().enumerate() {
        if m.role() != Role::Assistant {
            continue;
        }
        for call in m.message.calls() {
            let result = messages
                .iter()
                .enumerate()
                .skip(i + 1)
                .find(|(j, r)| {
                    r.role() == Role::Tool
                        && r.message.tool_call_id.as_deref() == Some(call.id.as_str())
                        && !claimed.contains(j)
                })
                .map(|(j, _)| j);
            if let Some(j) = result {
                claimed.insert(j);
            }
            pairs.push(ToolPair {
                call_message_index: i,
                call_id: call.id.clone(),
                result_message_index: result,
            });
        }
    }
    pairs
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompactionResult {
    pub messages: Vec<InternalMessage>,
    pub compacted: bool,
    /// Skill names, each listed once, in eviction order.
    pub dropped_skills: Vec<String>,
    pub dropped_messages: usize,
    pub orphan_ids: Vec<String>,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

pub fn compact_messages(
    messages: &[InternalMessage],
    skills: &[InjectedSkill],
    max_tokens: usize,
) -> Result<CompactionResult> {
    let tokens_before = estimate_tokens(messages);
    if tokens_before <= max_tokens {
        return Ok(CompactionResult {
            messages: messages.to_vec(),
            compacted: false,
            dropped_skills: Vec::new(),
            dropped_messages: 0,
            orphan_ids: Vec::new(),
            tokens_before,
            tokens_after: tokens_before,
        });
    }

    let pairs = build_tool_pairs(messages);
    let orphan_ids: Vec<String> = pairs
        .iter()
        .filter(|p| p.is_orphan())
        .map(|p| p.call_id.clone())
        .collect();

    let mut protected: HashSet<usize> = HashSet::new();
    for (i, m) in messages.iter().enumerate() {
        if m.role() == Role::System && !m.meta.droppable {
            protected.insert(i);
        }
    }
    for pair in &pairs {
        protected.insert(pair.call_message_index);
        if let Some(r) = pair.result_message_index {
            protected.insert(r);
        }
    }
    if let Some(last_user) = messages.iter().rposition(|m| m.role() == Role::User) {
        protected.insert(last_user);
    }

    let sizes: Vec<usize> = messages.iter().map(|m| message_tokens(&m.message)).collect();
    let mut keep = vec![true; messages.len()];
    let mut current = tokens_before;

    let skill_rank: HashMap<&str, usize> = skills
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut droppable: Vec<usize> = (0..messages.len())
        .filter(|i| messages[*i].meta.droppable && !protected.contains(i))
        .collect();
    droppable.sort_by_key(|&i| {
        let meta = &messages[i].meta;
        let rank = meta
            .skill_id
            .as_deref()
            .and_then(|id| skill_rank.get(id).copied())
            .unwrap_or(usize::MAX);
        (meta.priority.unwrap_or(u32::MAX), rank, i)
    });

    let mut dropped_skills: Vec<String> = Vec::new();
    let mut dropped_messages = 0;

    for i in droppable {
        if current <= max_tokens {
            break;
        }
        keep[i] = false;
        current -= sizes[i];
        match &messages[i].meta.skill_id {
            Some(id) => {
                if !dropped_skills.contains(id) {
                    info!(skill = %id, tokens = current, "dropping skill to fit context");
                    dropped_skills.push(id.clone());
                }
            }
            None => dropped_messages += 1,
        }
    }

    for i in 0..messages.len() {
        if current <= max_tokens {
            break;
        }
        if !keep[i] || protected.contains(&i) || messages[i].meta.droppable {
            continue;
        }
        keep[i] = false;
        current -= sizes[i];
        dropped_messages += 1;
    }

    if current > max_tokens {
        return Err(Error::context_overflow(current, max_tokens));
    }

    let kept: Vec<InternalMessage> = messages
        .iter()
        .zip(keep)
        .filter_map(|(m, k)| k.then(|| m.clone()))
        .collect();

    debug!(
        before = tokens_before,
        after = current,
        dropped_skills = dropped_skills.len(),
        dropped_messages,
        "context compacted"
    );

    Ok(CompactionResult {
        messages: kept,
        compacted: true,
        dropped_skills,
        dropped_messages,
        orphan_ids,
        tokens_before,
        tokens_after: current,
    })
}
