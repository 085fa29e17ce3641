//! ScriptedProvider - deterministic LLM responses for testing
//!
//! Replays a sequence of steps (text, tool calls, errors, delays) and
//! records every request it receives so tests can assert on prompts.

use crate::provider::{cancellable, LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta};
use async_stream::stream;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One scripted model round.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Terminal text response, streamed in small chunks.
    Text(String),
    /// One or more tool calls, in order.
    ToolCalls(Vec<(String, Value)>),
    /// Text preamble followed by tool calls in the same round.
    TextThenTools(String, Vec<(String, Value)>),
    /// The request fails before streaming.
    Error(String),
    /// Wait, then behave like the inner step.
    Delay(Duration, Box<ScriptStep>),
}

impl ScriptStep {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn tool(name: impl Into<String>, args: Value) -> Self {
        Self::ToolCalls(vec![(name.into(), args)])
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delay(delay, Box::new(self))
    }
}

type Responder = dyn Fn(&LlmRequest) -> ScriptStep + Send + Sync;

enum Script {
    Sequence {
        steps: Mutex<Vec<ScriptStep>>,
        fallback: ScriptStep,
    },
    Responder(Arc<Responder>),
}

pub struct ScriptedProvider {
    name: String,
    script: Script,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    /// Steps consumed in order; once exhausted, answers with a fixed text.
    pub fn sequence(steps: Vec<ScriptStep>) -> Self {
        Self::build(Script::Sequence {
            steps: Mutex::new(steps),
            fallback: ScriptStep::text("(scripted: sequence exhausted)"),
        })
    }

    /// Always answer with the same step.
    pub fn constant(step: ScriptStep) -> Self {
        Self::build(Script::Sequence {
            steps: Mutex::new(Vec::new()),
            fallback: step,
        })
    }

    /// Compute each step from the request.
    pub fn from_fn(f: impl Fn(&LlmRequest) -> ScriptStep + Send + Sync + 'static) -> Self {
        Self::build(Script::Responder(Arc::new(f)))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn build(script: Script) -> Self {
        Self {
            name: "scripted".to_string(),
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Every request received so far, in order.
    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_step(&self, request: &LlmRequest) -> (usize, ScriptStep) {
        let round = {
            let mut requests = self.requests.lock().await;
            requests.push(request.clone());
            requests.len()
        };
        let step = match &self.script {
            Script::Sequence { steps, fallback } => {
                let mut steps = steps.lock().await;
                if steps.is_empty() {
                    fallback.clone()
                } else {
                    steps.remove(0)
                }
            }
            Script::Responder(f) => f(request),
        };
        (round, step)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let (round, mut step) = self.next_step(&request).await;

        let (text, calls) = loop {
            match step {
                ScriptStep::Delay(delay, inner) => {
                    match &cancel {
                        Some(token) => tokio::select! {
                            _ = token.cancelled() => return Err(LlmError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                    step = *inner;
                }
                ScriptStep::Error(message) => return Err(LlmError::RequestFailed(message)),
                ScriptStep::Text(text) => break (text, Vec::new()),
                ScriptStep::ToolCalls(calls) => break (String::new(), calls),
                ScriptStep::TextThenTools(text, calls) => break (text, calls),
            }
        };

        let stream = stream! {
            for chunk in chunk_text(&text, 20) {
                yield Ok(StreamDelta::Text(chunk));
            }
            let has_calls = !calls.is_empty();
            for (i, (name, args)) in calls.into_iter().enumerate() {
                let id = format!("call_{}_{}", round, i);
                yield Ok(StreamDelta::ToolCallStart { id: id.clone(), name });
                yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments: args.to_string() });
                yield Ok(StreamDelta::ToolCallEnd { id });
            }
            let stop_reason = if has_calls { "tool_use" } else { "end_turn" };
            yield Ok(StreamDelta::Done { stop_reason: Some(stop_reason.to_string()), usage: None });
        };

        Ok(cancellable(Box::pin(stream), cancel))
    }
}

/// Split on char boundaries into pieces of at most `size` chars.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}
