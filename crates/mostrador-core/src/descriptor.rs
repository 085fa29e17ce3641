//! Declarative agent and team descriptors.
//!
//! Descriptors are read from configuration at startup and never mutated
//! afterwards. The agent factory turns them into runnable agents.

use serde::{Deserialize, Serialize};

fn default_store() -> String {
    "ia".to_string()
}

fn default_num_history_responses() -> usize {
    4
}

fn default_num_memories() -> usize {
    10
}

fn default_max_memories_per_user() -> usize {
    100
}

fn default_knowledge_k() -> usize {
    5
}

/// A named configuration bundling model, prompt, tools, knowledge and memory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `provider:model`, e.g. `anthropic:claude-sonnet-4-5`.
    pub model_ref: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    /// `tool_id` (all operations) or `tool_id.op_name`.
    #[serde(default)]
    pub tool_refs: Vec<String>,
    #[serde(default)]
    pub knowledge: Option<KnowledgeRef>,
    #[serde(default)]
    pub memory_policy: MemoryPolicy,
    #[serde(default)]
    pub profile_tags: Vec<String>,
    /// Substitute `{user_id}`, `{session_id}`, ... into persona/instructions.
    #[serde(default)]
    pub add_state_in_messages: bool,
    #[serde(default)]
    pub add_datetime_to_instructions: bool,
    /// Named store holding this agent's sessions and memories.
    #[serde(default = "default_store")]
    pub store: String,
    /// Overrides the runtime-wide tool-round cap.
    #[serde(default)]
    pub max_tool_rounds: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeRef {
    pub collection: String,
    #[serde(default = "default_knowledge_k")]
    pub k: usize,
    /// Search once per turn with the latest user message.
    #[serde(default = "default_true")]
    pub search_knowledge: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryPolicy {
    /// Number of user/assistant pairs replayed into every prompt.
    #[serde(default = "default_num_history_responses")]
    pub num_history_responses: usize,
    #[serde(default)]
    pub enable_user_memories: bool,
    #[serde(default = "default_num_memories")]
    pub num_memories: usize,
    #[serde(default = "default_max_memories_per_user")]
    pub max_memories_per_user: usize,
    #[serde(default)]
    pub enable_session_summaries: bool,
    /// Model used for distillation and summaries; defaults to the agent's.
    #[serde(default)]
    pub memory_model_ref: Option<String>,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            num_history_responses: default_num_history_responses(),
            enable_user_memories: false,
            num_memories: default_num_memories(),
            max_memories_per_user: default_max_memories_per_user(),
            enable_session_summaries: false,
            memory_model_ref: None,
        }
    }
}

impl MemoryPolicy {
    /// Number of history turns (user + assistant) replayed per prompt.
    pub fn history_turns(&self) -> usize {
        self.num_history_responses * 2
    }
}

/// A supervisor that classifies a message and forwards it to one member.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamDescriptor {
    pub team_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model_ref: String,
    /// Intent rubric given to the classifier.
    #[serde(default)]
    pub instructions: Vec<String>,
    pub members: Vec<TeamMember>,
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default)]
    pub profile_tags: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TeamMember {
    pub agent_id: String,
    /// Lowercase phrases that indicate this member, used when the
    /// classifier model is unavailable.
    #[serde(default)]
    pub intents: Vec<String>,
}
