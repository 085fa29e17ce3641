//! Anthropic Messages API provider

use crate::provider::{cancellable, send_cancellable, status_error, LlmError, LlmProvider, LlmResult, LlmStream};
use crate::sse::sse_payloads;
use crate::types::{validate_and_heal_messages, LlmRequest, StreamDelta, Usage};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            url: MESSAGES_URL.to_string(),
        }
    }

    /// Full messages endpoint, for proxies and tests.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let body = request_body(&request);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "anthropic request"
        );

        let builder = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let response = send_cancellable(builder, &cancel).await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(status = %status, "anthropic request rejected");
            return Err(status_error(status, detail));
        }

        let deltas = delta_stream(sse_payloads(response.bytes_stream()));
        Ok(cancellable(Box::pin(deltas), cancel))
    }
}

/// The block transcript already has the Messages API shape; only the
/// envelope is built here.
pub(crate) fn request_body(request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": validate_and_heal_messages(&request.messages),
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": true,
    });
    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
        body["tools"] = json!(tools);
    }
    body
}

fn delta_stream(
    payloads: impl Stream<Item = LlmResult<String>> + Send + 'static,
) -> impl Stream<Item = LlmResult<StreamDelta>> + Send {
    async_stream::stream! {
        let mut translator = EventTranslator::default();
        let mut terminal = false;
        tokio::pin!(payloads);

        while let Some(payload) = payloads.next().await {
            let payload = match payload {
                Ok(p) => p,
                Err(e) => {
                    terminal = true;
                    yield Err(e);
                    break;
                }
            };
            let event: StreamEvent = match serde_json::from_str(&payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable anthropic event");
                    continue;
                }
            };
            if let Some(delta) = translator.translate(event) {
                terminal = matches!(delta, Ok(StreamDelta::Done { .. }) | Err(_));
                yield delta;
                if terminal {
                    break;
                }
            }
        }

        if !terminal {
            yield Err(LlmError::StreamError("stream ended before message_stop".to_string()));
        }
    }
}

/// Folds Messages API stream events into provider-neutral deltas.
#[derive(Default)]
struct EventTranslator {
    /// content block index -> tool_use id
    open_tools: HashMap<u32, String>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

impl EventTranslator {
    fn translate(&mut self, event: StreamEvent) -> Option<LlmResult<StreamDelta>> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.usage = message.usage;
                None
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block: BlockStart::ToolUse { id, name },
            } => {
                self.open_tools.insert(index, id.clone());
                Some(Ok(StreamDelta::ToolCallStart { id, name }))
            }
            StreamEvent::ContentBlockStart { .. } => None,
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => Some(Ok(StreamDelta::Text(text))),
                BlockDelta::ThinkingDelta { thinking } => Some(Ok(StreamDelta::Thinking(thinking))),
                BlockDelta::InputJsonDelta { partial_json } => self.open_tools.get(&index).map(|id| {
                    Ok(StreamDelta::ToolCallDelta {
                        id: id.clone(),
                        arguments: partial_json,
                    })
                }),
                BlockDelta::Other => None,
            },
            StreamEvent::ContentBlockStop { index } => self
                .open_tools
                .remove(&index)
                .map(|id| Ok(StreamDelta::ToolCallEnd { id })),
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(late) = usage {
                    let usage = self.usage.get_or_insert_with(Usage::default);
                    usage.output_tokens = late.output_tokens;
                    if late.input_tokens > 0 {
                        usage.input_tokens = late.input_tokens;
                    }
                }
                None
            }
            StreamEvent::MessageStop => {
                debug!(stop_reason = ?self.stop_reason, "anthropic message complete");
                Some(Ok(StreamDelta::Done {
                    stop_reason: self.stop_reason.take().or_else(|| Some("end_turn".to_string())),
                    usage: self.usage.take(),
                }))
            }
            StreamEvent::Error { error } => Some(Err(LlmError::StreamError(format!(
                "{}: {}",
                error.kind, error.message
            )))),
            StreamEvent::Ping | StreamEvent::Other => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: MessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MessageStart {
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
}
