//! Core types for Mostrador

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for SessionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Message role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A conversation between one user and one agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: SessionKey,
    pub user_id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Whether a turn is visible to subsequent prompts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    #[default]
    Committed,
    /// Persisted, but its invocation records are missing; excluded from
    /// prompts until reconciled.
    Partial,
}

/// A tool call emitted by the model inside an assistant turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRef {
    pub invocation_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of a tool call, carried by a tool turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResultRef {
    pub invocation_id: String,
    pub name: String,
    pub status: InvocationStatus,
}

/// A turn before the store assigns its sequence number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnDraft {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRef>,
}

impl TurnDraft {
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRef>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: calls,
            tool_results: Vec::new(),
        }
    }

    pub fn tool_result(result: ToolResultRef, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: vec![result],
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }
}

/// One recorded message in a session. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: SessionKey,
    pub seq: u64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRef>,
    #[serde(default)]
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn from_draft(session_id: SessionKey, seq: u64, draft: TurnDraft) -> Self {
        Self {
            session_id,
            seq,
            role: draft.role,
            content: draft.content,
            tool_calls: draft.tool_calls,
            tool_results: draft.tool_results,
            status: TurnStatus::Committed,
            created_at: Utc::now(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == TurnStatus::Committed
    }

    /// A user message or a terminal assistant message (no tool calls).
    pub fn is_conversational(&self) -> bool {
        match self.role {
            Role::User => true,
            Role::Assistant => self.tool_calls.is_empty(),
            Role::System | Role::Tool => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Pending,
    Ok,
    Error,
}

/// Record of one tool call. Terminal states are retained.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: String,
    pub session_id: SessionKey,
    pub turn_seq: u64,
    pub op_ref: String,
    pub arg_hash: String,
    pub status: InvocationStatus,
    pub result_or_error: String,
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// A distilled fact about a user, scoped to one agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserMemory {
    pub memory_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub text: String,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
}

impl UserMemory {
    /// Ranking score: importance decayed by days since last reinforcement.
    pub fn score(&self, now: DateTime<Utc>) -> f64 {
        let age_days = (now - self.last_reinforced_at).num_seconds().max(0) as f64 / 86_400.0;
        self.importance as f64 / (1.0 + age_days)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionKey,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn session_key_serializes_as_string() {
        let key = SessionKey::new("s-1");
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""s-1""#);
        let back: SessionKey = serde_json::from_str(r#""s-1""#).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn assistant_with_calls_is_not_conversational() {
        let call = ToolCallRef {
            invocation_id: "c1".into(),
            name: "product_by_sku".into(),
            arguments: serde_json::json!({"sku": "WUXACC0001"}),
        };
        let turn = Turn::from_draft(
            "s".into(),
            1,
            TurnDraft::assistant_with_calls("", vec![call]),
        );
        assert!(!turn.is_conversational());
        let turn = Turn::from_draft("s".into(), 2, TurnDraft::assistant("hola"));
        assert!(turn.is_conversational());
    }

    #[test]
    fn fresher_memory_outranks_stale_one() {
        let now = Utc::now();
        let mk = |days: i64| UserMemory {
            memory_id: "m".into(),
            user_id: "u".into(),
            agent_id: "a".into(),
            text: "t".into(),
            importance: 1.0,
            created_at: now - Duration::days(days),
            last_reinforced_at: now - Duration::days(days),
        };
        assert!(mk(0).score(now) > mk(3).score(now));
    }
}
