//! LLM Provider trait

use crate::types::{AccumulatedToolCall, Completion, LlmRequest, StreamDelta};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<LlmError> for mostrador_core::Error {
    fn from(e: LlmError) -> Self {
        use mostrador_core::Error;
        match e {
            LlmError::Timeout(_) => Error::Timeout(e.to_string()),
            LlmError::RateLimited { .. } | LlmError::NetworkError(_) | LlmError::StreamError(_) => {
                Error::upstream_transient("llm", e.to_string())
            }
            LlmError::UnknownProvider(_) => Error::ConfigError(e.to_string()),
            LlmError::Cancelled => Error::Internal(e.to_string()),
            _ => Error::upstream_fatal("llm", e.to_string()),
        }
    }
}

/// Stream type for LLM responses
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// LLM Provider trait
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Stream a completion response. If `cancel` is provided and triggered,
    /// the underlying HTTP connection is dropped and the stream yields `LlmError::Cancelled`.
    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;

    /// Stream and collect one full model round.
    async fn complete(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<Completion> {
        let stream = self.complete_stream(request, cancel).await?;
        collect_completion(stream).await
    }
}

/// Fold a delta stream into a [`Completion`].
pub async fn collect_completion(mut stream: LlmStream) -> LlmResult<Completion> {
    let mut completion = Completion::default();

    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::Text(text) => {
                if !text.is_empty() {
                    completion.text_chunks.push(text);
                }
            }
            StreamDelta::Thinking(_) => {}
            StreamDelta::ToolCallStart { id, name } => {
                completion.tool_calls.push(AccumulatedToolCall {
                    id,
                    name,
                    arguments: String::new(),
                });
            }
            StreamDelta::ToolCallDelta { id, arguments } => {
                if let Some(call) = completion.tool_calls.iter_mut().find(|c| c.id == id) {
                    call.arguments.push_str(&arguments);
                }
            }
            StreamDelta::ToolCallEnd { .. } => {}
            StreamDelta::Done { stop_reason, usage } => {
                completion.stop_reason = stop_reason;
                completion.usage = usage;
                break;
            }
            StreamDelta::Error(message) => return Err(LlmError::StreamError(message)),
        }
    }

    Ok(completion)
}

/// Wrap a stream so that triggering `cancel` ends it with `LlmError::Cancelled`.
pub fn cancellable(stream: LlmStream, cancel: Option<CancellationToken>) -> LlmStream {
    let Some(cancel) = cancel else {
        return stream;
    };
    Box::pin(async_stream::stream! {
        let mut stream = stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = stream.next() => Some(item),
            };
            match next {
                None => {
                    yield Err(LlmError::Cancelled);
                    break;
                }
                Some(Some(item)) => yield item,
                Some(None) => break,
            }
        }
    })
}

/// Send an HTTP request, abandoning it if `cancel` fires first.
pub(crate) async fn send_cancellable(
    request: reqwest::RequestBuilder,
    cancel: &Option<CancellationToken>,
) -> LlmResult<reqwest::Response> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(LlmError::Cancelled),
            response = request.send() => Ok(response?),
        },
        None => Ok(request.send().await?),
    }
}

/// Map a non-success HTTP status to the provider error taxonomy.
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthFailed(body),
        429 => LlmError::RateLimited { retry_after_ms: 60_000 },
        413 => LlmError::ContextOverflow(body),
        _ => LlmError::RequestFailed(format!("{}: {}", status, body)),
    }
}
