//! Mostrador Agent - runtime for tool-using conversational agents

pub mod factory;
pub mod hooks;
pub mod locks;
pub mod prompt;
pub mod runtime;

pub use factory::{AgentFactory, AgentInfo, AgentRegistry};
pub use hooks::{Exchange, PostTurnHooks};
pub use locks::{SessionGuard, SessionLocks, SessionSlot};
pub use prompt::{build_system_prompt, PromptState};
pub use runtime::{AgentEvent, AgentRuntime, RunOutcome, RunRequest, EXHAUSTED_MESSAGE};
pub use mostrador_llm::CancellationToken;
