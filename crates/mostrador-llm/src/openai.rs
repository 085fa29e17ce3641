//! OpenAI-compatible chat-completions provider with SSE streaming

use crate::provider::{cancellable, send_cancellable, status_error, LlmError, LlmProvider, LlmResult, LlmStream};
use crate::sse::sse_payloads;
use crate::types::{validate_and_heal_messages, ContentBlock, LlmContent, LlmMessage, LlmRequest, StreamDelta, Usage};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let body = build_body(&request);
        debug!(model = %request.model, messages = request.messages.len(), "openai request");

        let builder = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body);
        let response = send_cancellable(builder, &cancel).await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "openai request rejected");
            return Err(status_error(status, error_text));
        }

        let deltas = delta_stream(sse_payloads(response.bytes_stream()));
        Ok(cancellable(Box::pin(deltas), cancel))
    }
}

/// Translate the block transcript into chat-completions messages.
pub(crate) fn build_body(request: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    for msg in validate_and_heal_messages(&request.messages) {
        messages.extend(convert_message(&msg));
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_completion_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
    }
    body
}

fn convert_message(msg: &LlmMessage) -> Vec<Value> {
    let blocks = match &msg.content {
        LlmContent::Text(text) => return vec![json!({"role": msg.role, "content": text})],
        LlmContent::Blocks(blocks) => blocks,
    };

    if msg.role == "assistant" {
        let text = msg.content.text();
        let tool_calls: Vec<Value> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                })),
                _ => None,
            })
            .collect();
        let mut out = json!({
            "role": "assistant",
            "content": if text.is_empty() { Value::Null } else { json!(text) },
        });
        if !tool_calls.is_empty() {
            out["tool_calls"] = json!(tool_calls);
        }
        return vec![out];
    }

    let mut out = Vec::new();
    for block in blocks {
        if let ContentBlock::ToolResult { tool_use_id, content, .. } = block {
            out.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}));
        }
    }
    let text = msg.content.text();
    if !text.is_empty() {
        out.push(json!({"role": msg.role, "content": text}));
    }
    out
}

fn delta_stream(
    payloads: impl Stream<Item = LlmResult<String>> + Send + 'static,
) -> impl Stream<Item = LlmResult<StreamDelta>> + Send {
    async_stream::stream! {
        // tool-call index -> id; ids only arrive on the first delta of each call
        let mut tool_ids: BTreeMap<u32, String> = BTreeMap::new();
        let mut stop_reason: Option<String> = None;
        let mut usage: Option<Usage> = None;
        let mut done = false;

        tokio::pin!(payloads);

        while let Some(payload) = payloads.next().await {
            let payload = match payload {
                Ok(p) => p,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if payload.trim() == "[DONE]" {
                done = true;
                break;
            }

            let chunk: ChatChunk = match serde_json::from_str(&payload) {
                Ok(c) => c,
                Err(e) => {
                    yield Err(LlmError::InvalidResponse(e.to_string()));
                    continue;
                }
            };

            if let Some(u) = chunk.usage {
                usage = Some(Usage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens });
            }

            for choice in chunk.choices {
                if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                    yield Ok(StreamDelta::Text(text));
                }
                for call in choice.delta.tool_calls.unwrap_or_default() {
                    if let Some(id) = call.id {
                        let name = call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
                        tool_ids.insert(call.index, id.clone());
                        yield Ok(StreamDelta::ToolCallStart { id, name });
                    }
                    let arguments = call.function.and_then(|f| f.arguments).unwrap_or_default();
                    if let (Some(id), false) = (tool_ids.get(&call.index), arguments.is_empty()) {
                        yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments });
                    }
                }
                if let Some(reason) = choice.finish_reason {
                    stop_reason = Some(reason);
                }
            }
        }

        if done || stop_reason.is_some() {
            for id in std::mem::take(&mut tool_ids).into_values() {
                yield Ok(StreamDelta::ToolCallEnd { id });
            }
            yield Ok(StreamDelta::Done { stop_reason, usage });
        } else {
            yield Err(LlmError::StreamError("stream ended before completion".to_string()));
        }
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<ChatFunction>,
}

#[derive(Deserialize)]
struct ChatFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
