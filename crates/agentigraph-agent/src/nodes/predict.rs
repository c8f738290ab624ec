//! Predict node: one model turn.

use crate::config::{AgentConfig, AgentEvent, EventSink};
use crate::state::{AgentState, StepResult};
use agentigraph_core::{Error, Node, Result};
use agentigraph_llm::{heal_messages, Completion, LlmProvider, LlmRequest, StreamDelta, StreamSession};
use std::sync::Arc;
use tracing::{debug, info};

pub struct PredictNode {
    provider: Arc<dyn LlmProvider>,
    config: Arc<AgentConfig>,
    events: EventSink,
}

impl PredictNode {
    pub fn new(provider: Arc<dyn LlmProvider>, config: Arc<AgentConfig>, events: EventSink) -> Self {
        Self { provider, config, events }
    }

    fn build_request(&self, state: &AgentState) -> LlmRequest {
        let tools = if state.tools.is_empty() {
            None
        } else {
            Some(state.tools.values().map(|t| t.definition()).collect())
        };
        LlmRequest {
            model: self.config.model.clone(),
            messages: heal_messages(&state.wire_messages()),
            tools,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            response_format: self.config.response_format.clone(),
            tool_choice: self.config.tool_choice.clone(),
        }
    }

    async fn stream_turn(&self, request: LlmRequest, state: &AgentState) -> Result<Completion> {
        let stream = self.provider.complete_stream(request, Some(state.cancel.clone())).await?;
        let mut session = StreamSession::new(stream);
        while let Some(delta) = session.next().await? {
            match delta {
                StreamDelta::Text(text) => self.events.emit(AgentEvent::Text(text)),
                StreamDelta::Thinking(text) => self.events.emit(AgentEvent::Thinking(text)),
                _ => {}
            }
        }
        Ok(session.into_completion())
    }
}

#[async_trait::async_trait]
impl Node<AgentState> for PredictNode {
    async fn run(&self, mut state: AgentState) -> Result<AgentState> {
        if state.step_count + 1 > state.max_steps {
            return Err(Error::MaxStepsExceeded {
                step_count: state.step_count + 1,
                max_steps: state.max_steps,
            });
        }
        if state.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let request = self.build_request(&state);
        debug!(
            step = state.step_count + 1,
            messages = request.messages.len(),
            model = %request.model,
            "predict"
        );

        // Structured output is fetched whole so the payload is never split.
        let completion = if request.wants_structured_output() {
            let c = self.provider.complete(request, Some(state.cancel.clone())).await?;
            if !c.content.is_empty() {
                self.events.emit(AgentEvent::Text(c.content.clone()));
            }
            c
        } else {
            self.stream_turn(request, &state).await?
        };

        state.step_count += 1;
        state.usage += completion.usage;
        state.output = completion.content.clone();
        state.reasoning = completion.reasoning_content.clone();
        state.finish_reason = Some(completion.finish_reason.clone());
        state.steps.push(StepResult::Text {
            step: state.step_count,
            content: completion.content.clone(),
            finish_reason: completion.finish_reason.clone(),
        });
        state.push(completion.to_message());

        if completion.tool_calls.is_empty() || state.tools.is_empty() {
            state.done = true;
            info!(
                steps = state.step_count,
                tokens = state.usage.total(),
                reason = %completion.finish_reason,
                "agent finished"
            );
            self.events.emit(AgentEvent::Done { stop_reason: completion.finish_reason });
        }
        Ok(state)
    }
}
