//! Agentigraph LLM - model backend contract, stream sessions, provider adapters

pub mod anthropic;
pub mod mock;
pub mod provider;
pub mod session;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use mock::{CallPath, MockBehavior, MockProvider};
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use session::StreamSession;
pub use tokio_util::sync::CancellationToken;
pub use types::*;
