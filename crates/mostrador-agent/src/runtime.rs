//! Agent runtime - one conversational turn with bounded tool rounds

use crate::hooks::{Exchange, PostTurnHooks};
use crate::locks::{SessionGuard, SessionLocks};
use crate::prompt::{build_system_prompt, PromptState};
use chrono::Utc;
use mostrador_core::config::RuntimeConfig;
use mostrador_core::{
    AgentDescriptor, Error, InvocationStatus, Result, SessionKey, ToolCallRef, ToolResultRef, Turn, TurnDraft,
};
use mostrador_knowledge::{Retriever, ScoredDocument};
use mostrador_llm::{
    validate_and_heal_messages, Completion, ContentBlock, LlmContent, LlmError, LlmMessage, LlmProvider, LlmRequest,
    LlmTool,
};
use mostrador_memory::{append_tool_turn, reconcile_partial_turns, MemoryContext, MemoryStore};
use mostrador_tools::{InvocationCtx, OpRef, ToolDescriptor, ToolRegistry};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Answer given when the model keeps calling tools past the round cap.
pub const EXHAUSTED_MESSAGE: &str =
    "No pude completar tu solicitud en este momento. ¿Puedes reformularla o darme más detalles?";

const MAX_TOOL_RESULT_CHARS: usize = 50_000;
const MAX_TOKENS: u32 = 4096;

/// Events of a streaming run, serialized one per line by the gateway.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A piece of the terminal assistant message.
    Chunk { content: String },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        name: String,
        status: InvocationStatus,
        content: String,
    },
    Final { message: String, turn_seq: u64 },
    Error { error: String, message: String },
}

impl AgentEvent {
    pub fn from_error(e: &Error) -> Self {
        Self::Error {
            error: e.kind().as_str().to_string(),
            message: e.user_message().to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub session_id: SessionKey,
    pub user_id: String,
    pub message: String,
    /// Emit tool calls and results as events while streaming.
    pub stream_intermediate_steps: bool,
}

impl RunRequest {
    pub fn new(session_id: impl Into<SessionKey>, user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            message: message.into(),
            stream_intermediate_steps: false,
        }
    }

    pub fn with_intermediate_steps(mut self, enabled: bool) -> Self {
        self.stream_intermediate_steps = enabled;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunOutcome {
    pub message: String,
    pub turn_seq: u64,
}

/// A runnable agent: a descriptor bound to its provider, store and tools.
pub struct AgentRuntime {
    descriptor: AgentDescriptor,
    provider: Arc<dyn LlmProvider>,
    model: String,
    store: Arc<dyn MemoryStore>,
    tools: Arc<ToolRegistry>,
    catalog: Vec<ToolDescriptor>,
    retriever: Option<Retriever>,
    hooks: Option<Arc<PostTurnHooks>>,
    locks: Arc<SessionLocks>,
    config: RuntimeConfig,
}

impl AgentRuntime {
    /// Fails when a tool ref does not resolve in `tools`.
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        store: Arc<dyn MemoryStore>,
        tools: Arc<ToolRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let catalog = tools.resolve_refs(&descriptor.tool_refs)?;
        Ok(Self {
            descriptor,
            provider,
            model: model.into(),
            store,
            tools,
            catalog,
            retriever: None,
            hooks: None,
            locks: Arc::new(SessionLocks::from_config(&config)),
            config,
        })
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_hooks(mut self, hooks: PostTurnHooks) -> Self {
        self.hooks = (!hooks.is_empty()).then(|| Arc::new(hooks));
        self
    }

    /// Share admission locks with other runtimes.
    pub fn with_locks(mut self, locks: Arc<SessionLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn agent_id(&self) -> &str {
        &self.descriptor.agent_id
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Model-facing tool definitions.
    pub fn tool_definitions(&self) -> Vec<LlmTool> {
        self.catalog.iter().map(ToolDescriptor::to_llm_tool).collect()
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.descriptor.max_tool_rounds.unwrap_or(self.config.max_tool_rounds)
    }

    /// Committed turns of a session, oldest first.
    pub async fn transcript(&self, session_id: &SessionKey) -> Result<Vec<Turn>> {
        let turns = self.store.load_turns(session_id).await?;
        Ok(turns.into_iter().filter(Turn::is_committed).collect())
    }

    /// Run one turn. With `events`, the terminal message is streamed as
    /// chunks and a failure is reported as an `error` event as well.
    pub async fn run(
        &self,
        request: RunRequest,
        events: Option<mpsc::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let result = self.run_admitted(&request, events.as_ref(), &cancel).await;
        if let (Err(e), Some(tx)) = (&result, &events) {
            let _ = tx.send(AgentEvent::from_error(e)).await;
        }
        result
    }

    async fn run_admitted(
        &self,
        request: &RunRequest,
        events: Option<&mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if request.message.trim().is_empty() {
            return Err(Error::Input("message is empty".into()));
        }

        let guard = self.locks.acquire(&request.session_id).await?;
        let started = Instant::now();
        let turn_cancel = cancel.child_token();
        let limit = Duration::from_secs(self.config.turn_timeout_s);

        let result = tokio::time::timeout(limit, self.turn(request, events, &turn_cancel, &guard)).await;
        drop(guard);
        let (outcome, rounds) = match result {
            Ok(result) => result?,
            Err(_) => {
                turn_cancel.cancel();
                warn!(agent_id = %self.agent_id(), session_id = %request.session_id, "turn timed out");
                return Err(Error::Timeout(format!("turn exceeded {}s", limit.as_secs())));
            }
        };

        info!(
            agent_id = %self.agent_id(),
            session_id = %request.session_id,
            turn_seq = outcome.turn_seq,
            tool_rounds = rounds,
            duration_ms = started.elapsed().as_millis() as u64,
            "turn complete"
        );

        if let Some(hooks) = &self.hooks {
            let exchange = Exchange {
                user_id: request.user_id.clone(),
                session_id: request.session_id.clone(),
                user_message: request.message.clone(),
                assistant_message: outcome.message.clone(),
            };
            if events.is_some() {
                let hooks = hooks.clone();
                tokio::spawn(async move { hooks.run(&exchange).await });
            } else {
                hooks.run(&exchange).await;
            }
        }

        Ok(outcome)
    }

    async fn turn(
        &self,
        request: &RunRequest,
        events: Option<&mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
        guard: &SessionGuard,
    ) -> Result<(RunOutcome, usize)> {
        let agent_id = self.agent_id();
        let session_id = &request.session_id;

        self.store.touch_session(session_id, &request.user_id, agent_id).await?;
        if let Err(e) = self.reconcile(session_id).await {
            warn!(session_id = %session_id, error = %e, "partial turn reconciliation failed");
        }

        let memory = MemoryContext::compile(
            self.store.as_ref(),
            &self.descriptor.memory_policy,
            session_id,
            &request.user_id,
            agent_id,
        )
        .await?;
        let knowledge = self.search_knowledge(&request.message).await;
        let state = PromptState {
            user_id: request.user_id.clone(),
            session_id: session_id.clone(),
            agent_id: agent_id.to_string(),
            now: Utc::now(),
        };
        let system = build_system_prompt(&self.descriptor, &state, &knowledge, &memory);

        let mut messages = memory.history_messages();
        push_user_text(&mut messages, &request.message);
        self.store.append_turn(session_id, TurnDraft::user(request.message.clone())).await?;

        let tools = self.tool_definitions();
        let ctx = InvocationCtx::new(session_id.clone(), &request.user_id, agent_id);
        let max_rounds = self.max_tool_rounds();
        let mut rounds = 0;

        let (message, chunks) = loop {
            let llm_request = LlmRequest {
                model: self.model.clone(),
                messages: validate_and_heal_messages(&messages),
                tools: (!tools.is_empty()).then(|| tools.clone()),
                max_tokens: Some(MAX_TOKENS),
                system: system.clone(),
                ..Default::default()
            };
            let completion = self.call_model(llm_request, cancel).await?;

            if completion.is_terminal() {
                let text = completion.text();
                break (text, completion.text_chunks);
            }
            if rounds >= max_rounds {
                warn!(agent_id, session_id = %session_id, max_rounds, "tool round cap reached");
                break (EXHAUSTED_MESSAGE.to_string(), vec![EXHAUSTED_MESSAGE.to_string()]);
            }
            rounds += 1;
            debug!(agent_id, session_id = %session_id, round = rounds, calls = completion.tool_calls.len(), "tool round");
            self.tool_round(&completion, &ctx, &mut messages, request, events, cancel, guard)
                .await?;
        };

        let turn = self.store.append_turn(session_id, TurnDraft::assistant(message.clone())).await?;

        if let Some(tx) = events {
            for content in chunks {
                let _ = tx.send(AgentEvent::Chunk { content }).await;
            }
            let _ = tx
                .send(AgentEvent::Final {
                    message: message.clone(),
                    turn_seq: turn.seq,
                })
                .await;
        }

        Ok((
            RunOutcome {
                message,
                turn_seq: turn.seq,
            },
            rounds,
        ))
    }

    /// Persist the assistant's calls, run them in declared order and
    /// append their results to the transcript.
    ///
    /// The round runs in a detached task holding the session guard. A
    /// cancelled or timed-out turn stops waiting for it, but the call in
    /// flight still completes and is recorded, and every call after it is
    /// answered with a cancelled tool turn instead of being dispatched.
    #[allow(clippy::too_many_arguments)]
    async fn tool_round(
        &self,
        completion: &Completion,
        ctx: &InvocationCtx,
        messages: &mut Vec<LlmMessage>,
        request: &RunRequest,
        events: Option<&mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
        guard: &SessionGuard,
    ) -> Result<()> {
        let calls: Vec<ToolCallRef> = completion
            .tool_calls
            .iter()
            .map(|call| ToolCallRef {
                invocation_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call
                    .parse_arguments()
                    .unwrap_or_else(|_| Value::String(call.arguments.clone())),
            })
            .collect();
        let text = completion.text();

        let assistant_turn = self
            .store
            .append_turn(&ctx.session_id, TurnDraft::assistant_with_calls(text.clone(), calls.clone()))
            .await?;

        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
        blocks.extend(calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.invocation_id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        }));
        messages.push(LlmMessage::assistant(blocks));

        let planned: Vec<PlannedCall> = calls
            .into_iter()
            .map(|call| PlannedCall {
                op: self.op_for(&call.name),
                ctx: ctx.clone().for_call(call.invocation_id.clone(), assistant_turn.seq),
                call,
            })
            .collect();
        let intermediate = events.filter(|_| request.stream_intermediate_steps).cloned();
        let tools = self.tools.clone();
        let store = self.store.clone();
        let guard = guard.clone();
        let round_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut results = Vec::with_capacity(planned.len());
            for planned in planned {
                let live = !round_cancel.is_cancelled();
                let id = planned.call.invocation_id.clone();
                let name = planned.call.name.clone();
                let events = intermediate.as_ref().filter(|_| live);

                if let Some(tx) = events {
                    let _ = tx
                        .send(AgentEvent::ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            arguments: planned.call.arguments.clone(),
                        })
                        .await;
                }
                let (content, status) = answer_call(tools.as_ref(), store.as_ref(), planned, live).await?;
                if let Some(tx) = events.filter(|_| !round_cancel.is_cancelled()) {
                    let _ = tx
                        .send(AgentEvent::ToolResult {
                            id: id.clone(),
                            name,
                            status,
                            content: content.clone(),
                        })
                        .await;
                }
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content,
                    is_error: Some(status == InvocationStatus::Error),
                });
            }
            Ok::<_, Error>(results)
        });

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Internal("turn cancelled".into())),
            joined = task => joined.map_err(|e| Error::Internal(format!("tool round failed: {}", e)))?,
        }?;
        messages.push(LlmMessage::user(results));
        Ok(())
    }

    /// One model round under the per-call deadline, retried once on timeout.
    async fn call_model(&self, request: LlmRequest, cancel: &CancellationToken) -> Result<Completion> {
        let limit = Duration::from_secs(self.config.model_timeout_s);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(limit, self.provider.complete(request.clone(), Some(cancel.clone()))).await;
            let timed_out = matches!(result, Err(_) | Ok(Err(LlmError::Timeout(_))));
            if timed_out && attempt < 2 {
                warn!(agent_id = %self.agent_id(), model = %self.model, "model call timed out, retrying");
                continue;
            }
            return match result {
                Ok(completion) => completion.map_err(Error::from),
                Err(_) => Err(Error::Timeout(format!("model call exceeded {}s", limit.as_secs()))),
            };
        }
    }

    async fn search_knowledge(&self, query: &str) -> Vec<ScoredDocument> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        let Some(knowledge) = self.descriptor.knowledge.as_ref().filter(|k| k.search_knowledge) else {
            return Vec::new();
        };
        match retriever.search(&knowledge.collection, query, knowledge.k).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(agent_id = %self.agent_id(), collection = %knowledge.collection, error = %e, "knowledge search failed");
                Vec::new()
            }
        }
    }

    /// Re-record invocations still held in the registry log for partial
    /// turns, then commit the turns that became complete.
    async fn reconcile(&self, session_id: &SessionKey) -> Result<()> {
        let turns = self.store.load_turns(session_id).await?;
        let partial: Vec<&Turn> = turns.iter().filter(|t| !t.is_committed()).collect();
        if partial.is_empty() {
            return Ok(());
        }

        let known = self.store.load_invocations(session_id).await?;
        for turn in partial {
            for result in &turn.tool_results {
                if known.iter().any(|i| i.invocation_id == result.invocation_id) {
                    continue;
                }
                if let Some(mut record) = self.tools.find_invocation(session_id, &result.invocation_id) {
                    record.turn_seq = turn.seq;
                    self.store.record_invocation(record).await?;
                }
            }
        }
        reconcile_partial_turns(self.store.as_ref(), session_id).await?;
        Ok(())
    }

    /// Only operations in this agent's catalog are callable.
    fn op_for(&self, name: &str) -> OpRef {
        self.catalog
            .iter()
            .find(|d| d.op.op_name == name)
            .map(|d| d.op.clone())
            .unwrap_or_else(|| OpRef::new("unknown", name))
    }
}

struct PlannedCall {
    call: ToolCallRef,
    op: OpRef,
    ctx: InvocationCtx,
}

/// Invoke one call, or record it as skipped when `run` is false, and
/// persist its tool turn.
async fn answer_call(
    tools: &ToolRegistry,
    store: &dyn MemoryStore,
    planned: PlannedCall,
    run: bool,
) -> Result<(String, InvocationStatus)> {
    let PlannedCall { call, op, ctx } = planned;
    let outcome = if run {
        tools.invoke(&op, call.arguments, &ctx).await
    } else {
        tools.skip(&op, &call.arguments, &ctx, "turn ended before the call ran")
    };
    let content = truncate_for_model(outcome.content());
    let status = outcome.record.status;
    let result = ToolResultRef {
        invocation_id: ctx.invocation_id.clone(),
        name: call.name,
        status,
    };
    let draft = TurnDraft::tool_result(result, content.clone());
    append_tool_turn(store, &ctx.session_id, draft, outcome.record).await?;
    Ok((content, status))
}

/// Append user text, merging into a trailing user text message.
fn push_user_text(messages: &mut Vec<LlmMessage>, text: &str) {
    if let Some(last) = messages.last_mut() {
        if last.role == "user" {
            if let LlmContent::Text(existing) = &last.content {
                last.content = format!("{}\n\n{}", existing, text).into();
                return;
            }
        }
    }
    messages.push(LlmMessage::user(text));
}

fn truncate_for_model(content: String) -> String {
    if content.len() <= MAX_TOOL_RESULT_CHARS {
        return content;
    }
    let mut end = MAX_TOOL_RESULT_CHARS;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[truncated, {} total chars]", &content[..end], content.len())
}
