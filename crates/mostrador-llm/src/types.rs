//! LLM types for requests and streaming responses

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// LLM request
#[derive(Clone, Debug, Serialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<LlmMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<LlmTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            messages: Vec::new(),
            tools: None,
            max_tokens: Some(8192),
            temperature: None,
            system: None,
        }
    }
}

impl LlmRequest {
    /// Text of the last user message, ignoring tool-result blocks.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .find_map(|m| {
                let text = m.content.text();
                (!text.is_empty()).then_some(text)
            })
    }
}

/// Message in LLM conversation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmMessage {
    pub role: String,
    pub content: LlmContent,
}

impl LlmMessage {
    pub fn user(content: impl Into<LlmContent>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<LlmContent>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Message content - can be string or array of blocks
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LlmContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl LlmContent {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        match self {
            LlmContent::Text(s) => s.clone(),
            LlmContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    fn blocks(&self) -> &[ContentBlock] {
        match self {
            LlmContent::Text(_) => &[],
            LlmContent::Blocks(blocks) => blocks,
        }
    }
}

impl From<String> for LlmContent {
    fn from(s: String) -> Self {
        LlmContent::Text(s)
    }
}

impl From<&str> for LlmContent {
    fn from(s: &str) -> Self {
        LlmContent::Text(s.to_string())
    }
}

impl From<Vec<ContentBlock>> for LlmContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        LlmContent::Blocks(blocks)
    }
}

/// Content block types
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Tool definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Streaming delta from LLM
#[derive(Clone, Debug)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments: String },
    ToolCallEnd { id: String },
    Done { stop_reason: Option<String>, usage: Option<Usage> },
    Error(String),
}

/// Token usage
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Accumulated tool call from streaming
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AccumulatedToolCall {
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// A fully collected model round.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    /// Text deltas in arrival order.
    pub text_chunks: Vec<String>,
    pub tool_calls: Vec<AccumulatedToolCall>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn text(&self) -> String {
        self.text_chunks.concat()
    }

    /// A round with no tool calls ends the turn.
    pub fn is_terminal(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

const INTERRUPTED_TOOL_RESULT: &str = "tool call was interrupted before producing a result";

/// Repair a transcript so every `tool_use` has a matching `tool_result` in
/// the following user message and no `tool_result` is orphaned.
///
/// Missing results get a synthetic error result. Results whose `tool_use_id`
/// was never issued are dropped.
pub fn validate_and_heal_messages(messages: &[LlmMessage]) -> Vec<LlmMessage> {
    let mut healed: Vec<LlmMessage> = Vec::with_capacity(messages.len());
    let mut pending: Vec<String> = Vec::new();

    for msg in messages {
        if msg.role == "user" {
            let answered: HashSet<&str> = msg
                .content
                .blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect();

            let mut blocks: Vec<ContentBlock> = pending
                .iter()
                .filter(|id| !answered.contains(id.as_str()))
                .map(|id| synthetic_result(id))
                .collect();

            match &msg.content {
                LlmContent::Text(text) if blocks.is_empty() => {
                    healed.push(LlmMessage::user(text.clone()));
                }
                LlmContent::Text(text) => {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                    healed.push(LlmMessage::user(blocks));
                }
                LlmContent::Blocks(original) => {
                    for block in original {
                        match block {
                            ContentBlock::ToolResult { tool_use_id, .. }
                                if !pending.iter().any(|p| p == tool_use_id) =>
                            {
                                tracing::debug!(tool_use_id = %tool_use_id, "dropping orphaned tool_result");
                            }
                            other => blocks.push(other.clone()),
                        }
                    }
                    if !blocks.is_empty() {
                        healed.push(LlmMessage::user(blocks));
                    }
                }
            }
            pending.clear();
        } else {
            if !pending.is_empty() {
                let blocks: Vec<ContentBlock> = pending.iter().map(|id| synthetic_result(id)).collect();
                healed.push(LlmMessage::user(blocks));
                pending.clear();
            }
            pending = msg
                .content
                .blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                    _ => None,
                })
                .collect();
            healed.push(msg.clone());
        }
    }

    if !pending.is_empty() {
        let blocks: Vec<ContentBlock> = pending.iter().map(|id| synthetic_result(id)).collect();
        healed.push(LlmMessage::user(blocks));
    }

    healed
}

fn synthetic_result(id: &str) -> ContentBlock {
    ContentBlock::ToolResult {
        tool_use_id: id.to_string(),
        content: INTERRUPTED_TOOL_RESULT.to_string(),
        is_error: Some(true),
    }
}
