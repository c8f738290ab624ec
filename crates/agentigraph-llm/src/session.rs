//! Stream session: pulls deltas one at a time and folds them into a final
//! [`Completion`].

use crate::provider::{LlmError, LlmResult, LlmStream};
use crate::types::{AccumulatedToolCall, Completion, StreamDelta, Usage};
use futures::StreamExt;

pub struct StreamSession {
    stream: LlmStream,
    text: String,
    reasoning: String,
    tool_calls: Vec<AccumulatedToolCall>,
    current_tool: Option<AccumulatedToolCall>,
    stop_reason: Option<String>,
    usage: Usage,
    finished: bool,
}

impl StreamSession {
    pub fn new(stream: LlmStream) -> Self {
        Self {
            stream,
            text: String::new(),
            reasoning: String::new(),
            tool_calls: Vec::new(),
            current_tool: None,
            stop_reason: None,
            usage: Usage::default(),
            finished: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.finished
    }

    /// Next delta, already folded into the aggregate. `Ok(None)` once the
    /// stream is exhausted or a `Done` delta was seen.
    pub async fn next(&mut self) -> LlmResult<Option<StreamDelta>> {
        if self.finished {
            return Ok(None);
        }
        let delta = match self.stream.next().await {
            Some(Ok(delta)) => delta,
            Some(Err(e)) => {
                self.finished = true;
                return Err(e);
            }
            None => {
                self.finished = true;
                return Ok(None);
            }
        };

        match &delta {
            StreamDelta::Text(text) => self.text.push_str(text),
            StreamDelta::Thinking(thinking) => self.reasoning.push_str(thinking),
            StreamDelta::ToolCallStart { id, name } => {
                if let Some(open) = self.current_tool.take() {
                    self.tool_calls.push(open);
                }
                self.current_tool = Some(AccumulatedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                });
            }
            StreamDelta::ToolCallDelta { id, arguments } => {
                match self.current_tool.as_mut() {
                    Some(tool) if tool.id == *id => tool.arguments.push_str(arguments),
                    _ => {
                        if let Some(tool) = self.tool_calls.iter_mut().find(|t| t.id == *id) {
                            tool.arguments.push_str(arguments);
                        }
                    }
                }
            }
            StreamDelta::ToolCallEnd { .. } => {
                if let Some(tool) = self.current_tool.take() {
                    self.tool_calls.push(tool);
                }
            }
            StreamDelta::Done { stop_reason, usage } => {
                if let Some(reason) = stop_reason {
                    self.stop_reason = Some(reason.clone());
                }
                if let Some(u) = usage {
                    self.usage += *u;
                }
                self.finished = true;
            }
            StreamDelta::Error(message) => {
                self.finished = true;
                return Err(LlmError::StreamError(message.clone()));
            }
        }
        Ok(Some(delta))
    }

    /// Consume the rest of the stream and return the aggregate.
    pub async fn drain(mut self) -> LlmResult<Completion> {
        while self.next().await?.is_some() {}
        Ok(self.into_completion())
    }

    /// Aggregate of everything seen so far.
    pub fn into_completion(mut self) -> Completion {
        if let Some(open) = self.current_tool.take() {
            self.tool_calls.push(open);
        }
        let tool_calls: Vec<_> = self
            .tool_calls
            .into_iter()
            .map(AccumulatedToolCall::into_tool_call)
            .collect();
        let finish_reason = self.stop_reason.unwrap_or_else(|| {
            if tool_calls.is_empty() { "end_turn" } else { "tool_use" }.to_string()
        });
        Completion {
            content: self.text,
            reasoning_content: if self.reasoning.is_empty() { None } else { Some(self.reasoning) },
            tool_calls,
            finish_reason,
            usage: self.usage,
        }
    }
}
