//! Memory context: what a turn's prompt sees of past conversation

use crate::store::MemoryStore;
use mostrador_core::{MemoryPolicy, Result, Role, SessionKey, SessionSummary, Turn, UserMemory};
use mostrador_llm::LlmMessage;

/// Recent history, session summary and user memories for one prompt.
#[derive(Clone, Debug, Default)]
pub struct MemoryContext {
    /// Committed user and terminal assistant turns, oldest first.
    pub history: Vec<Turn>,
    pub summary: Option<SessionSummary>,
    pub memories: Vec<UserMemory>,
}

impl MemoryContext {
    pub async fn compile(
        store: &dyn MemoryStore,
        policy: &MemoryPolicy,
        session_id: &SessionKey,
        user_id: &str,
        agent_id: &str,
    ) -> Result<Self> {
        let turns = store.load_turns(session_id).await?;
        let history = recent_conversation(turns, policy.history_turns());

        let summary = if policy.enable_session_summaries {
            store.get_session_summary(agent_id, session_id).await?
        } else {
            None
        };
        let memories = if policy.enable_user_memories {
            store.get_user_memories(user_id, agent_id, policy.num_memories).await?
        } else {
            Vec::new()
        };

        Ok(Self {
            history,
            summary,
            memories,
        })
    }

    /// System-prompt block, or `None` when there is nothing to add.
    pub fn render(&self) -> Option<String> {
        let mut sections = Vec::new();
        if !self.memories.is_empty() {
            let lines: Vec<String> = self.memories.iter().map(|m| format!("- {}", m.text)).collect();
            sections.push(format!("## User memories\n{}", lines.join("\n")));
        }
        if let Some(summary) = self.summary.as_ref().filter(|s| !s.text.is_empty()) {
            sections.push(format!("## Session summary\n{}", summary.text));
        }
        (!sections.is_empty()).then(|| sections.join("\n\n"))
    }

    /// History as provider messages. Consecutive messages of one role are
    /// merged and the sequence starts with a user message.
    pub fn history_messages(&self) -> Vec<LlmMessage> {
        let mut messages: Vec<LlmMessage> = Vec::new();
        for turn in &self.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System | Role::Tool => continue,
            };
            if messages.is_empty() && role != "user" {
                continue;
            }
            match messages.last_mut() {
                Some(last) if last.role == role => {
                    let merged = format!("{}\n\n{}", last.content.text(), turn.content);
                    last.content = merged.into();
                }
                _ => messages.push(LlmMessage {
                    role: role.to_string(),
                    content: turn.content.clone().into(),
                }),
            }
        }
        messages
    }
}

/// Last `window` committed conversational turns, oldest first.
pub fn recent_conversation(turns: Vec<Turn>, window: usize) -> Vec<Turn> {
    let mut kept: Vec<Turn> = turns
        .into_iter()
        .filter(|t| t.is_committed() && t.is_conversational())
        .collect();
    let skip = kept.len().saturating_sub(window);
    kept.drain(..skip);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use mostrador_core::{ToolCallRef, TurnDraft, TurnStatus};

    fn turn(seq: u64, draft: TurnDraft) -> Turn {
        Turn::from_draft("s".into(), seq, draft)
    }

    #[test]
    fn window_skips_tool_rounds_and_partial_turns() {
        let call = ToolCallRef {
            invocation_id: "c".into(),
            name: "product_by_sku".into(),
            arguments: serde_json::json!({}),
        };
        let mut partial = turn(4, TurnDraft::assistant("a medias"));
        partial.status = TurnStatus::Partial;
        let turns = vec![
            turn(1, TurnDraft::user("hola")),
            turn(2, TurnDraft::assistant_with_calls("", vec![call])),
            turn(3, TurnDraft::assistant("hola, ¿en qué te ayudo?")),
            partial,
            turn(5, TurnDraft::user("precio del filtro")),
        ];
        let kept = recent_conversation(turns, 2);
        let seqs: Vec<u64> = kept.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![3, 5]);
    }

    #[test]
    fn history_starts_with_user_and_merges_roles() {
        let ctx = MemoryContext {
            history: vec![
                turn(1, TurnDraft::assistant("suelto")),
                turn(2, TurnDraft::user("uno")),
                turn(3, TurnDraft::user("dos")),
                turn(4, TurnDraft::assistant("ok")),
            ],
            ..Default::default()
        };
        let messages = ctx.history_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.text(), "uno\n\ndos");
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn empty_context_renders_nothing() {
        assert!(MemoryContext::default().render().is_none());
    }
}
