//! Member classification
//!
//! The supervisor model answers with a small JSON decision. When the model
//! fails or names an unknown member, intent keywords decide, then the
//! previous member, then the first member.

use mostrador_core::{AgentDescriptor, Role, TeamDescriptor, TeamMember, Turn};
use serde::Deserialize;
use serde_json::Value;

const CLASSIFIER_PROMPT: &str = "\
You route messages for a team of assistants at an auto-parts retailer. \
Pick exactly one member to answer the user's message. Never answer the \
message yourself.";

const ANSWER_FORMAT: &str = "\
Answer with JSON only: {\"member\": \"<agent_id>\", \"follow_up\": <true|false>, \
\"misrouted\": <true|false>}. follow_up is true when the message continues the \
previous topic without changing subject. misrouted is true when the user says \
the previous answer came from the wrong assistant or was not what they asked for.";

/// Phrases that signal the previous member was the wrong one.
const MISROUTE_PHRASES: &[&str] = &[
    "no te pregunté eso",
    "no pregunté eso",
    "no era eso",
    "eso no es lo que",
    "te equivocaste",
    "me equivoqué de",
    "no es lo que pedí",
    "otro agente",
    "otro asistente",
];

/// The classifier model's answer.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Decision {
    pub member: Option<String>,
    pub follow_up: bool,
    pub misrouted: bool,
}

/// How the member was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteSource {
    Classifier,
    FollowUp,
    Misroute,
    Keywords,
    Previous,
    Default,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::FollowUp => "follow_up",
            Self::Misroute => "misroute",
            Self::Keywords => "keywords",
            Self::Previous => "previous",
            Self::Default => "default",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub member: String,
    /// The user flagged the previous delegation; answer with an apology.
    pub misrouted: bool,
    pub source: RouteSource,
}

impl Route {
    fn new(member: &str, source: RouteSource) -> Self {
        Self {
            member: member.to_string(),
            misrouted: source == RouteSource::Misroute,
            source,
        }
    }
}

/// `agents` are the members' descriptors, in member order.
pub fn system_prompt(team: &TeamDescriptor, agents: &[&AgentDescriptor]) -> String {
    let mut prompt = String::from(CLASSIFIER_PROMPT);

    prompt.push_str("\n\n## Members\n");
    for (member, agent) in team.members.iter().zip(agents) {
        prompt.push_str(&format!("- {}: {}", member.agent_id, agent.name));
        if !agent.description.is_empty() {
            prompt.push_str(&format!(". {}", agent.description));
        }
        if !member.intents.is_empty() {
            prompt.push_str(&format!(" (intents: {})", member.intents.join(", ")));
        }
        prompt.push('\n');
    }

    if !team.instructions.is_empty() {
        prompt.push_str("\n## Rubric\n");
        for line in &team.instructions {
            prompt.push_str(&format!("- {}\n", line));
        }
    }

    prompt.push('\n');
    prompt.push_str(ANSWER_FORMAT);
    prompt
}

/// The classifier's user message: previous member, recent exchange and
/// the message to route.
pub fn classifier_input(message: &str, previous: Option<&str>, recent: &[Turn]) -> String {
    let mut input = String::new();
    if let Some(previous) = previous {
        input.push_str(&format!("Previous member: {}\n\n", previous));
    }
    let conversation: Vec<String> = recent
        .iter()
        .filter(|t| t.is_committed() && t.is_conversational())
        .map(|t| {
            let who = if t.role == Role::User { "User" } else { "Assistant" };
            format!("{}: {}", who, t.content)
        })
        .collect();
    if !conversation.is_empty() {
        input.push_str(&format!("Recent conversation:\n{}\n\n", conversation.join("\n")));
    }
    input.push_str(&format!("Message:\n{}", message));
    input
}

/// Lenient parse: the first JSON object in the answer.
pub fn parse_decision(answer: &str) -> Option<Decision> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&answer[start..=end]).ok()?;
    serde_json::from_value(value).ok()
}

pub fn signals_misroute(message: &str) -> bool {
    let lower = message.to_lowercase();
    MISROUTE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Member whose intents match the message most often, skipping `exclude`.
pub fn keyword_match<'a>(message: &str, members: &'a [TeamMember], exclude: Option<&str>) -> Option<&'a str> {
    let lower = message.to_lowercase();
    let mut best: Option<(&str, usize)> = None;
    for member in members {
        if Some(member.agent_id.as_str()) == exclude {
            continue;
        }
        let hits = member.intents.iter().filter(|i| lower.contains(&i.to_lowercase())).count();
        if hits > 0 && best.map_or(true, |(_, n)| hits > n) {
            best = Some((member.agent_id.as_str(), hits));
        }
    }
    best.map(|(id, _)| id)
}

/// Pick the member for `message`. `decision` is `None` when the classifier
/// failed or answered with something unparseable.
pub fn choose(decision: Option<&Decision>, message: &str, members: &[TeamMember], previous: Option<&str>) -> Route {
    let known = |id: &str| members.iter().any(|m| m.agent_id == id);
    let previous = previous.filter(|p| known(*p));
    let named = decision.and_then(|d| d.member.as_deref()).filter(|m| known(*m));

    let misrouted = decision.map_or_else(|| signals_misroute(message), |d| d.misrouted);
    if misrouted {
        if let Some(prev) = previous {
            let alternative = named
                .filter(|m| *m != prev)
                .or_else(|| keyword_match(message, members, Some(prev)))
                .or_else(|| members.iter().map(|m| m.agent_id.as_str()).find(|m| *m != prev));
            if let Some(alternative) = alternative {
                return Route::new(alternative, RouteSource::Misroute);
            }
        }
    }

    if let Some(decision) = decision {
        if decision.follow_up {
            if let Some(prev) = previous {
                return Route::new(prev, RouteSource::FollowUp);
            }
        }
        if let Some(member) = named {
            return Route::new(member, RouteSource::Classifier);
        }
    }

    if let Some(member) = keyword_match(message, members, None) {
        return Route::new(member, RouteSource::Keywords);
    }
    if let Some(prev) = previous {
        return Route::new(prev, RouteSource::Previous);
    }
    let first = members.first().map(|m| m.agent_id.as_str()).unwrap_or_default();
    Route::new(first, RouteSource::Default)
}
