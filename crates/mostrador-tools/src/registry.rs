//! Typed tool registry and invocation pipeline
//!
//! Every operation is addressed by `(tool_id, op_name)` and carries declared
//! schemas and policies. Invocation validates arguments, consults the cache,
//! dispatches with retries inside a deadline, and records the outcome.

use crate::cache::ToolCache;
use crate::canonical::{arg_hash, cache_key};
use crate::descriptor::{OpRef, ToolDescriptor};
use crate::error::ToolError;
use crate::log::InvocationLog;
use crate::retry::run_with_retry;
use crate::schema;
use async_trait::async_trait;
use chrono::Utc;
use mostrador_core::{Error, InvocationStatus, Result, SessionKey, ToolInvocation};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Who is calling, and for which model tool call.
#[derive(Clone, Debug)]
pub struct InvocationCtx {
    pub session_id: SessionKey,
    pub user_id: String,
    pub agent_id: String,
    pub turn_seq: u64,
    /// The model's tool-call id; shared with the tool turn.
    pub invocation_id: String,
}

impl InvocationCtx {
    pub fn new(session_id: SessionKey, user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            session_id,
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            turn_seq: 0,
            invocation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn for_call(mut self, invocation_id: impl Into<String>, turn_seq: u64) -> Self {
        self.invocation_id = invocation_id.into();
        self.turn_seq = turn_seq;
        self
    }
}

/// Executes the operations of one tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, op_name: &str, args: Value, ctx: &InvocationCtx) -> std::result::Result<Value, ToolError>;
}

/// A handler together with the operations it serves.
pub trait Toolkit: ToolHandler {
    fn descriptors(&self) -> Vec<ToolDescriptor>;
}

/// Progress of one invocation. Terminal states are `Ok` and `FatalError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationState {
    Created,
    Validated,
    CacheHit,
    Dispatched,
    RetryableError,
    Ok,
    FatalError,
}

/// Result of `invoke`: the persisted record and the value or error.
#[derive(Clone, Debug)]
pub struct InvocationOutcome {
    pub record: ToolInvocation,
    pub result: std::result::Result<Value, ToolError>,
}

impl InvocationOutcome {
    /// Content of the tool turn shown to the model.
    pub fn content(&self) -> String {
        match &self.result {
            Ok(value) => render_value(value),
            Err(e) => e.model_message(),
        }
    }
}

/// Strings are passed through; other JSON is serialized compactly.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone)]
struct RegisteredOp {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

pub struct ToolRegistry {
    ops: RwLock<BTreeMap<OpRef, RegisteredOp>>,
    cache: ToolCache,
    log: InvocationLog,
    invocation_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(10_000, 256, Duration::from_secs(30))
    }
}

impl ToolRegistry {
    pub fn new(cache_capacity: usize, log_capacity: usize, invocation_timeout: Duration) -> Self {
        Self {
            ops: RwLock::new(BTreeMap::new()),
            cache: ToolCache::new(cache_capacity),
            log: InvocationLog::new(log_capacity),
            invocation_timeout,
        }
    }

    /// Idempotent for identical schemas; a differing schema is a config error.
    pub fn register(&self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let mut ops = self.ops.write();
        if let Some(existing) = ops.get(&descriptor.op) {
            if existing.descriptor.same_schema(&descriptor) {
                return Ok(());
            }
            return Err(Error::ConfigError(format!(
                "operation {} already registered with a different schema",
                descriptor.op
            )));
        }
        debug!(op = %descriptor.op, cache_ttl_s = descriptor.cache.ttl_s, "registered operation");
        ops.insert(descriptor.op.clone(), RegisteredOp { descriptor, handler });
        Ok(())
    }

    pub fn register_toolkit<T: Toolkit + 'static>(&self, toolkit: Arc<T>) -> Result<()> {
        let handler: Arc<dyn ToolHandler> = toolkit.clone();
        for descriptor in toolkit.descriptors() {
            self.register(descriptor, handler.clone())?;
        }
        Ok(())
    }

    /// Operations of `tool_id`, ordered by name.
    pub fn list_operations(&self, tool_id: &str) -> Vec<ToolDescriptor> {
        self.ops
            .read()
            .values()
            .filter(|op| op.descriptor.op.tool_id == tool_id)
            .map(|op| op.descriptor.clone())
            .collect()
    }

    pub fn tool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ops.read().keys().map(|op| op.tool_id.clone()).collect();
        ids.dedup();
        ids
    }

    pub fn descriptor(&self, op: &OpRef) -> Option<ToolDescriptor> {
        self.ops.read().get(op).map(|r| r.descriptor.clone())
    }

    /// Expand an agent's tool refs (`tool_id` or `tool_id.op_name`) into
    /// descriptors. Model-facing names are bare op names and must not collide.
    pub fn resolve_refs(&self, tool_refs: &[String]) -> Result<Vec<ToolDescriptor>> {
        let mut resolved: Vec<ToolDescriptor> = Vec::new();
        let mut names: HashMap<String, OpRef> = HashMap::new();

        for tool_ref in tool_refs {
            let found = match OpRef::parse(tool_ref) {
                Some(op) => self.descriptor(&op).into_iter().collect::<Vec<_>>(),
                None => self.list_operations(tool_ref),
            };
            if found.is_empty() {
                return Err(Error::ConfigError(format!("unknown tool reference '{}'", tool_ref)));
            }
            for descriptor in found {
                match names.get(&descriptor.op.op_name) {
                    Some(op) if *op == descriptor.op => continue,
                    Some(op) => {
                        return Err(Error::ConfigError(format!(
                            "operation name '{}' is provided by both {} and {}",
                            descriptor.op.op_name, op, descriptor.op
                        )))
                    }
                    None => {
                        names.insert(descriptor.op.op_name.clone(), descriptor.op.clone());
                        resolved.push(descriptor);
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Validate, serve from cache or dispatch, and record the invocation.
    pub async fn invoke(&self, op: &OpRef, args: Value, ctx: &InvocationCtx) -> InvocationOutcome {
        let started = Instant::now();
        let hash = arg_hash(&args);
        trace_state(ctx, op, InvocationState::Created);

        let entry = self.ops.read().get(op).cloned();
        let (result, cache_hit, attempts) = match entry {
            Some(entry) => self.execute(&entry, args, ctx).await,
            None => (Err(ToolError::UnknownOperation(op.to_string())), false, 0),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, result_or_error) = match &result {
            Ok(value) => {
                trace_state(ctx, op, InvocationState::Ok);
                (InvocationStatus::Ok, render_value(value))
            }
            Err(e) => {
                trace_state(ctx, op, InvocationState::FatalError);
                (InvocationStatus::Error, e.to_string())
            }
        };

        let record = ToolInvocation {
            invocation_id: ctx.invocation_id.clone(),
            session_id: ctx.session_id.clone(),
            turn_seq: ctx.turn_seq,
            op_ref: op.to_string(),
            arg_hash: hash,
            status,
            result_or_error,
            duration_ms,
            cache_hit,
            attempts,
            created_at: Utc::now(),
        };
        self.log.record(record.clone());

        match &result {
            Ok(_) => info!(
                session_id = %ctx.session_id,
                op = %op,
                duration_ms,
                cache_hit,
                attempts,
                "tool invocation ok"
            ),
            Err(e) => warn!(
                session_id = %ctx.session_id,
                op = %op,
                duration_ms,
                attempts,
                error = %e,
                "tool invocation failed"
            ),
        }

        InvocationOutcome { record, result }
    }

    /// Record a call that was never dispatched, so its tool turn still
    /// has an invocation behind it.
    pub fn skip(&self, op: &OpRef, args: &Value, ctx: &InvocationCtx, reason: &str) -> InvocationOutcome {
        let error = ToolError::Cancelled(reason.to_string());
        let record = ToolInvocation {
            invocation_id: ctx.invocation_id.clone(),
            session_id: ctx.session_id.clone(),
            turn_seq: ctx.turn_seq,
            op_ref: op.to_string(),
            arg_hash: arg_hash(args),
            status: InvocationStatus::Error,
            result_or_error: error.to_string(),
            duration_ms: 0,
            cache_hit: false,
            attempts: 0,
            created_at: Utc::now(),
        };
        self.log.record(record.clone());
        debug!(session_id = %ctx.session_id, op = %op, reason, "tool invocation skipped");
        InvocationOutcome {
            record,
            result: Err(error),
        }
    }

    /// In-memory invocation records for a session, oldest first.
    pub fn invocations(&self, session_id: &SessionKey) -> Vec<ToolInvocation> {
        self.log.for_session(session_id)
    }

    pub fn find_invocation(&self, session_id: &SessionKey, invocation_id: &str) -> Option<ToolInvocation> {
        self.log.find(session_id, invocation_id)
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    async fn execute(
        &self,
        entry: &RegisteredOp,
        args: Value,
        ctx: &InvocationCtx,
    ) -> (std::result::Result<Value, ToolError>, bool, u32) {
        let op = &entry.descriptor.op;
        let args = match schema::validate(&entry.descriptor.param_schema, args) {
            Ok(args) => args,
            Err(e) => return (Err(e), false, 0),
        };
        trace_state(ctx, op, InvocationState::Validated);

        let policy = &entry.descriptor.cache;
        if !policy.enabled {
            let (result, attempts) = self.dispatch(entry, &args, ctx).await;
            return (result, false, attempts);
        }

        let key = cache_key(op, &args);
        if let Some(value) = self.cache.get(&key) {
            trace_state(ctx, op, InvocationState::CacheHit);
            return (Ok(value), true, 0);
        }

        let _flight = self.cache.single_flight(&key).await;
        if let Some(value) = self.cache.get(&key) {
            trace_state(ctx, op, InvocationState::CacheHit);
            return (Ok(value), true, 0);
        }

        let (result, attempts) = self.dispatch(entry, &args, ctx).await;
        if let Ok(value) = &result {
            self.cache.insert(key, value.clone(), Duration::from_secs(policy.ttl_s));
        }
        (result, false, attempts)
    }

    async fn dispatch(
        &self,
        entry: &RegisteredOp,
        args: &Value,
        ctx: &InvocationCtx,
    ) -> (std::result::Result<Value, ToolError>, u32) {
        let deadline = tokio::time::Instant::now() + self.invocation_timeout;
        let handler = &entry.handler;
        let op = &entry.descriptor.op;
        let op_name = op.op_name.as_str();

        let attempted = run_with_retry(&entry.descriptor.retry, deadline, move |attempt| {
            if attempt > 1 {
                trace_state(ctx, op, InvocationState::RetryableError);
            }
            trace_state(ctx, op, InvocationState::Dispatched);
            handler.call(op_name, args.clone(), ctx)
        })
        .await;
        (attempted.result, attempted.attempts)
    }
}

fn trace_state(ctx: &InvocationCtx, op: &OpRef, state: InvocationState) {
    trace!(invocation_id = %ctx.invocation_id, op = %op, state = ?state, "invocation state");
}
