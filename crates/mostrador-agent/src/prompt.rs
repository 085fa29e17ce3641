//! System prompt assembly

use chrono::{DateTime, Utc};
use mostrador_core::{AgentDescriptor, SessionKey};
use mostrador_knowledge::ScoredDocument;
use mostrador_memory::MemoryContext;

/// Values substitutable into persona and instructions.
#[derive(Clone, Debug)]
pub struct PromptState {
    pub user_id: String,
    pub session_id: SessionKey,
    pub agent_id: String,
    pub now: DateTime<Utc>,
}

impl PromptState {
    /// Replace `{user_id}`, `{session_id}`, `{agent_id}`, `{date}` and
    /// `{datetime}`. Unknown placeholders are left as written.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{user_id}", &self.user_id)
            .replace("{session_id}", self.session_id.as_str())
            .replace("{agent_id}", &self.agent_id)
            .replace("{date}", &self.now.format("%Y-%m-%d").to_string())
            .replace("{datetime}", &self.now.format("%Y-%m-%d %H:%M UTC").to_string())
    }
}

pub fn build_system_prompt(
    agent: &AgentDescriptor,
    state: &PromptState,
    knowledge: &[ScoredDocument],
    memory: &MemoryContext,
) -> Option<String> {
    let render = |text: &str| {
        if agent.add_state_in_messages {
            state.render(text)
        } else {
            text.to_string()
        }
    };

    let mut sections: Vec<String> = Vec::new();

    if let Some(persona) = agent.persona.as_deref().filter(|p| !p.trim().is_empty()) {
        sections.push(render(persona));
    }

    if !agent.instructions.is_empty() {
        let lines: Vec<String> = agent.instructions.iter().map(|i| format!("- {}", render(i))).collect();
        sections.push(format!("## Instructions\n{}", lines.join("\n")));
    }

    if agent.add_datetime_to_instructions {
        sections.push(format!(
            "The current date and time is {}.",
            state.now.format("%Y-%m-%d %H:%M UTC")
        ));
    }

    if !knowledge.is_empty() {
        let docs: Vec<String> = knowledge
            .iter()
            .map(|doc| format!("[{}] {}", doc.id, doc.text()))
            .collect();
        sections.push(format!("## Reference\n{}", docs.join("\n\n")));
    }

    if let Some(block) = memory.render() {
        sections.push(block);
    }

    (!sections.is_empty()).then(|| sections.join("\n\n"))
}
