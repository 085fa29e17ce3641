//! Mostrador LLM - Provider adapters with streaming support

pub mod anthropic;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod scripted;
mod sse;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use provider::{cancellable, collect_completion, LlmError, LlmProvider, LlmResult, LlmStream};
pub use registry::ProviderRegistry;
pub use scripted::{ScriptStep, ScriptedProvider};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
