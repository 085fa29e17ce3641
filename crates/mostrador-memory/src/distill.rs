//! Post-turn memory distillation and session summaries
//!
//! Both run after a turn has been committed and use a lightweight model
//! call. Callers treat their failures as non-fatal.

use crate::store::MemoryStore;
use mostrador_core::{Error, MemoryPolicy, Result, Role, SessionKey, Turn, UserMemory};
use mostrador_llm::{LlmMessage, LlmProvider, LlmRequest};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Deadline of one distillation or summary call unless configured.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const DISTILL_PROMPT: &str = "\
You extract durable facts about the user from a conversation with a sales \
assistant for an auto-parts retailer. Keep only facts useful in future \
conversations: vehicles they own, branches they buy at, preferred brands, \
their role or company, recurring needs. Ignore one-off requests and \
anything the assistant said about products or prices.

Answer with a JSON array only, e.g. \
[{\"text\": \"Tiene un camión Volvo FH 2018\", \"importance\": 0.8}]. \
Write each fact as a short sentence in Spanish. importance is between 0 \
and 1. Answer [] when there is nothing worth keeping. Do not repeat facts \
that are already known.";

const SUMMARY_PROMPT: &str = "\
Summarize the conversation between a user and a sales assistant in at \
most five sentences, in Spanish. Keep SKUs, quantities, branches, vehicles \
and open questions. Extend the previous summary when one is given. Answer \
with the summary text only.";

const DEFAULT_IMPORTANCE: f32 = 0.5;

/// A fact proposed for long-term memory.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MemoryCandidate {
    pub text: String,
    #[serde(default = "default_importance")]
    pub importance: f32,
}

fn default_importance() -> f32 {
    DEFAULT_IMPORTANCE
}

/// Parse a model answer into candidates. Accepts the array embedded in
/// surrounding prose or a code fence, and bare strings as items.
pub fn parse_candidates(answer: &str) -> Vec<MemoryCandidate> {
    let (Some(start), Some(end)) = (answer.find('['), answer.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&answer[start..=end]) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(MemoryCandidate {
                text,
                importance: DEFAULT_IMPORTANCE,
            }),
            other => serde_json::from_value::<MemoryCandidate>(other).ok(),
        })
        .filter(|c| !c.text.trim().is_empty())
        .collect()
}

async fn ask(
    provider: &dyn LlmProvider,
    model: &str,
    limit: Duration,
    system: &str,
    prompt: String,
) -> Result<String> {
    let request = LlmRequest {
        model: model.to_string(),
        messages: vec![LlmMessage::user(prompt)],
        system: Some(system.to_string()),
        max_tokens: Some(1024),
        temperature: Some(0.0),
        ..Default::default()
    };
    let completion = tokio::time::timeout(limit, provider.complete(request, None))
        .await
        .map_err(|_| Error::Timeout(format!("memory model call exceeded {}s", limit.as_secs_f32())))??;
    Ok(completion.text())
}

pub struct Distiller {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl Distiller {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn extract(
        &self,
        user_message: &str,
        assistant_message: &str,
        known: &[UserMemory],
    ) -> Result<Vec<MemoryCandidate>> {
        let mut prompt = String::new();
        if !known.is_empty() {
            prompt.push_str("Known facts:\n");
            for memory in known {
                prompt.push_str(&format!("- {}\n", memory.text));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("User: {}\n\nAssistant: {}", user_message, assistant_message));

        let answer = ask(self.provider.as_ref(), &self.model, self.timeout, DISTILL_PROMPT, prompt).await?;
        Ok(parse_candidates(&answer))
    }

    /// Extract candidates from the latest exchange and upsert them.
    /// Returns how many candidates were stored or reinforced.
    pub async fn distill_into(
        &self,
        store: &dyn MemoryStore,
        policy: &MemoryPolicy,
        user_id: &str,
        agent_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<usize> {
        let known = store.get_user_memories(user_id, agent_id, policy.num_memories).await?;
        let candidates = self.extract(user_message, assistant_message, &known).await?;
        for candidate in &candidates {
            store
                .upsert_user_memory(
                    user_id,
                    agent_id,
                    &candidate.text,
                    candidate.importance,
                    policy.max_memories_per_user,
                )
                .await?;
        }
        debug!(user_id, agent_id, candidates = candidates.len(), "memories distilled");
        Ok(candidates.len())
    }
}

pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn summarize(&self, previous: Option<&str>, turns: &[Turn]) -> Result<String> {
        let mut prompt = String::new();
        if let Some(previous) = previous.filter(|p| !p.is_empty()) {
            prompt.push_str(&format!("Previous summary:\n{}\n\n", previous));
        }
        prompt.push_str("Conversation:\n");
        for turn in turns.iter().filter(|t| t.is_committed() && t.is_conversational()) {
            let who = if turn.role == Role::User { "User" } else { "Assistant" };
            prompt.push_str(&format!("{}: {}\n", who, turn.content));
        }
        let answer = ask(self.provider.as_ref(), &self.model, self.timeout, SUMMARY_PROMPT, prompt).await?;
        Ok(answer.trim().to_string())
    }

    /// Rewrite the stored summary from the last `window` turns.
    pub async fn rewrite(
        &self,
        store: &dyn MemoryStore,
        agent_id: &str,
        session_id: &SessionKey,
        window: usize,
    ) -> Result<()> {
        let previous = store.get_session_summary(agent_id, session_id).await?;
        let turns = store.load_recent_turns(session_id, window).await?;
        let text = self.summarize(previous.as_ref().map(|s| s.text.as_str()), &turns).await?;
        if text.is_empty() {
            return Ok(());
        }
        store.rewrite_session_summary(agent_id, session_id, &text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_inside_prose() {
        let answer = "Claro:\n```json\n[{\"text\": \"Compra en TEMUCO\", \"importance\": 0.7}, \"Tiene un Volvo FH\"]\n```";
        let candidates = parse_candidates(answer);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].importance, 0.7);
        assert_eq!(candidates[1].importance, DEFAULT_IMPORTANCE);
    }

    #[test]
    fn garbage_yields_no_candidates() {
        assert!(parse_candidates("no hay nada").is_empty());
        assert!(parse_candidates("] al revés [").is_empty());
        assert!(parse_candidates("[{\"text\": \"  \"}]").is_empty());
    }
}
