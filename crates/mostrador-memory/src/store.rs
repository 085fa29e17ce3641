//! Session, memory and auth-record stores

use crate::journal::{
    auth_location, memories_location, session_location, summaries_location, FileJournal, Journal, Location, NoJournal,
    Record, State,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mostrador_core::{
    Error, Result, Session, SessionKey, SessionSummary, ToolInvocation, Turn, TurnDraft, TurnStatus, UserMemory,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Conversation turns, invocation records and long-term memories.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Create the session record, or refresh `last_seen_at` of an existing one.
    /// A session belongs to one user and one agent; anyone else is refused
    /// with [`Error::Forbidden`].
    async fn touch_session(&self, session_id: &SessionKey, user_id: &str, agent_id: &str) -> Result<Session>;

    async fn get_session(&self, session_id: &SessionKey) -> Result<Option<Session>>;

    /// Atomic append; the returned turn carries the assigned `seq`.
    async fn append_turn(&self, session_id: &SessionKey, draft: TurnDraft) -> Result<Turn>;

    async fn set_turn_status(&self, session_id: &SessionKey, seq: u64, status: TurnStatus) -> Result<()>;

    /// All turns of a session in `seq` order.
    async fn load_turns(&self, session_id: &SessionKey) -> Result<Vec<Turn>>;

    /// The last `n` turns in chronological order.
    async fn load_recent_turns(&self, session_id: &SessionKey, n: usize) -> Result<Vec<Turn>> {
        let turns = self.load_turns(session_id).await?;
        let skip = turns.len().saturating_sub(n);
        Ok(turns.into_iter().skip(skip).collect())
    }

    async fn record_invocation(&self, invocation: ToolInvocation) -> Result<()>;

    async fn load_invocations(&self, session_id: &SessionKey) -> Result<Vec<ToolInvocation>>;

    /// Deduplicates by exact text; a match is reinforced instead of copied.
    /// Beyond `max_per_user`, the least recently reinforced entries go.
    async fn upsert_user_memory(
        &self,
        user_id: &str,
        agent_id: &str,
        text: &str,
        importance: f32,
        max_per_user: usize,
    ) -> Result<UserMemory>;

    /// Up to `max` memories, best `importance / (1 + age_days)` first.
    async fn get_user_memories(&self, user_id: &str, agent_id: &str, max: usize) -> Result<Vec<UserMemory>>;

    /// Last writer wins.
    async fn rewrite_session_summary(&self, agent_id: &str, session_id: &SessionKey, text: &str) -> Result<()>;

    async fn get_session_summary(&self, agent_id: &str, session_id: &SessionKey) -> Result<Option<SessionSummary>>;
}

/// Last-login records keyed by employee code.
#[async_trait]
pub trait AuthRecordStore: Send + Sync {
    /// Last writer wins.
    async fn put_auth_record(&self, employee_code: &str, record: Value) -> Result<()>;

    async fn get_auth_record(&self, employee_code: &str) -> Result<Option<Value>>;
}

/// State in memory, every mutation written through a [`Journal`] first.
///
/// Writers to the same journal file queue on that file's lane; the state
/// lock itself is never held across journal IO, so unrelated sessions do
/// not wait on each other's writes.
pub struct JournaledStore<J> {
    state: Mutex<State>,
    lanes: Lanes,
    journal: J,
}

type Lanes = Arc<DashMap<Location, Arc<Mutex<()>>>>;

/// Exclusive right to write one journal file.
struct LaneGuard {
    lanes: Lanes,
    location: Location,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.lanes
            .remove_if(&self.location, |_, lane| Arc::strong_count(lane) == 1);
    }
}

/// Process-local store.
pub type InMemoryStore = JournaledStore<NoJournal>;

/// JSON-lines store rooted at a directory; survives restarts.
pub type FileStore = JournaledStore<FileJournal>;

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_journal(NoJournal)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    /// Open (or create) a store at `root`, replaying existing records.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let journal = FileJournal::new(root);
        let records = journal.replay().await?;
        let mut state = State::default();
        let count = records.len();
        for record in records {
            state.apply(record);
        }
        info!(root = %journal.root().display(), records = count, "file store opened");
        Ok(Self {
            state: Mutex::new(state),
            lanes: Arc::default(),
            journal,
        })
    }
}

impl<J: Journal> JournaledStore<J> {
    pub fn with_journal(journal: J) -> Self {
        Self {
            state: Mutex::new(State::default()),
            lanes: Arc::default(),
            journal,
        }
    }

    async fn lane(&self, location: Location) -> LaneGuard {
        let lane = self.lanes.entry(location.clone()).or_default().clone();
        LaneGuard {
            lanes: self.lanes.clone(),
            location,
            guard: Some(lane.lock_owned().await),
        }
    }

    /// Callers hold the lane of `record.location()`.
    async fn commit(&self, record: Record) -> Result<()> {
        self.journal.write(&record).await?;
        self.state.lock().await.apply(record);
        Ok(())
    }
}

#[async_trait]
impl<J: Journal> MemoryStore for JournaledStore<J> {
    async fn touch_session(&self, session_id: &SessionKey, user_id: &str, agent_id: &str) -> Result<Session> {
        let _lane = self.lane(session_location(session_id)).await;
        let existing = {
            let state = self.state.lock().await;
            state.sessions.get(session_id).and_then(|log| log.meta.clone())
        };
        let now = Utc::now();
        let session = match existing {
            Some(existing) if existing.user_id != user_id || existing.agent_id != agent_id => {
                warn!(
                    session_id = %session_id,
                    user_id,
                    agent_id,
                    "session belongs to another user or agent"
                );
                return Err(Error::Forbidden(format!(
                    "session {} belongs to another user or agent",
                    session_id
                )));
            }
            Some(existing) => Session {
                last_seen_at: now,
                ..existing
            },
            None => Session {
                session_id: session_id.clone(),
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                created_at: now,
                last_seen_at: now,
            },
        };
        self.commit(Record::Session(session.clone())).await?;
        Ok(session)
    }

    async fn get_session(&self, session_id: &SessionKey) -> Result<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(session_id).and_then(|log| log.meta.clone()))
    }

    async fn append_turn(&self, session_id: &SessionKey, draft: TurnDraft) -> Result<Turn> {
        let _lane = self.lane(session_location(session_id)).await;
        let seq = self.state.lock().await.next_seq(session_id);
        let turn = Turn::from_draft(session_id.clone(), seq, draft);
        self.commit(Record::Turn(turn.clone())).await?;
        debug!(session_id = %session_id, seq, role = ?turn.role, "turn appended");
        Ok(turn)
    }

    async fn set_turn_status(&self, session_id: &SessionKey, seq: u64, status: TurnStatus) -> Result<()> {
        let _lane = self.lane(session_location(session_id)).await;
        let exists = self
            .state
            .lock()
            .await
            .sessions
            .get(session_id)
            .is_some_and(|log| log.turns.iter().any(|t| t.seq == seq));
        if !exists {
            return Err(Error::NotFound(format!("turn {} of session {}", seq, session_id)));
        }
        self.commit(Record::TurnStatus {
            session_id: session_id.clone(),
            seq,
            status,
        })
        .await
    }

    async fn load_turns(&self, session_id: &SessionKey) -> Result<Vec<Turn>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(session_id)
            .map(|log| log.turns.clone())
            .unwrap_or_default())
    }

    async fn record_invocation(&self, invocation: ToolInvocation) -> Result<()> {
        let _lane = self.lane(session_location(&invocation.session_id)).await;
        self.commit(Record::Invocation(invocation)).await
    }

    async fn load_invocations(&self, session_id: &SessionKey) -> Result<Vec<ToolInvocation>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(session_id)
            .map(|log| log.invocations.clone())
            .unwrap_or_default())
    }

    async fn upsert_user_memory(
        &self,
        user_id: &str,
        agent_id: &str,
        text: &str,
        importance: f32,
        max_per_user: usize,
    ) -> Result<UserMemory> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Input("memory text is empty".to_string()));
        }
        let importance = importance.clamp(0.0, 1.0);
        let now = Utc::now();

        let _lane = self.lane(memories_location(agent_id)).await;
        let existing = self
            .state
            .lock()
            .await
            .memories
            .get(agent_id)
            .and_then(|all| all.iter().find(|m| m.user_id == user_id && m.text == text))
            .cloned();

        let memory = match existing {
            Some(found) => UserMemory {
                importance: found.importance.max(importance),
                last_reinforced_at: now,
                ..found
            },
            None => UserMemory {
                memory_id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                text: text.to_string(),
                importance,
                created_at: now,
                last_reinforced_at: now,
            },
        };
        self.commit(Record::Memory(memory.clone())).await?;

        let mut owned: Vec<(chrono::DateTime<Utc>, String)> = self
            .state
            .lock()
            .await
            .memories
            .get(agent_id)
            .map(|all| {
                all.iter()
                    .filter(|m| m.user_id == user_id)
                    .map(|m| (m.last_reinforced_at, m.memory_id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if owned.len() > max_per_user.max(1) {
            owned.sort();
            let excess = owned.len() - max_per_user.max(1);
            for (_, memory_id) in owned.into_iter().take(excess) {
                debug!(agent_id, memory_id = %memory_id, "evicting stale memory");
                self.commit(Record::MemoryRemoved {
                    agent_id: agent_id.to_string(),
                    memory_id,
                })
                .await?;
            }
        }
        Ok(memory)
    }

    async fn get_user_memories(&self, user_id: &str, agent_id: &str, max: usize) -> Result<Vec<UserMemory>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut memories: Vec<UserMemory> = state
            .memories
            .get(agent_id)
            .map(|all| all.iter().filter(|m| m.user_id == user_id).cloned().collect())
            .unwrap_or_default();
        memories.sort_by(|a, b| {
            b.score(now)
                .total_cmp(&a.score(now))
                .then_with(|| b.last_reinforced_at.cmp(&a.last_reinforced_at))
        });
        memories.truncate(max);
        Ok(memories)
    }

    async fn rewrite_session_summary(&self, agent_id: &str, session_id: &SessionKey, text: &str) -> Result<()> {
        let _lane = self.lane(summaries_location(agent_id)).await;
        let summary = SessionSummary {
            session_id: session_id.clone(),
            text: text.trim().to_string(),
            updated_at: Utc::now(),
        };
        self.commit(Record::Summary {
            agent_id: agent_id.to_string(),
            summary,
        })
        .await
    }

    async fn get_session_summary(&self, agent_id: &str, session_id: &SessionKey) -> Result<Option<SessionSummary>> {
        let state = self.state.lock().await;
        Ok(state.summaries.get(&(agent_id.to_string(), session_id.clone())).cloned())
    }
}

#[async_trait]
impl<J: Journal> AuthRecordStore for JournaledStore<J> {
    async fn put_auth_record(&self, employee_code: &str, record: Value) -> Result<()> {
        let _lane = self.lane(auth_location()).await;
        self.commit(Record::Auth {
            employee_code: employee_code.to_string(),
            record,
        })
        .await
    }

    async fn get_auth_record(&self, employee_code: &str) -> Result<Option<Value>> {
        let state = self.state.lock().await;
        Ok(state.auth.get(employee_code).cloned())
    }
}

/// Append a tool turn and persist its invocation record. If the record
/// cannot be written the turn is marked partial, which keeps it out of
/// later prompts until [`reconcile_partial_turns`] finds the record.
pub async fn append_tool_turn(
    store: &dyn MemoryStore,
    session_id: &SessionKey,
    draft: TurnDraft,
    mut invocation: ToolInvocation,
) -> Result<Turn> {
    let mut turn = store.append_turn(session_id, draft).await?;
    invocation.turn_seq = turn.seq;
    if let Err(e) = store.record_invocation(invocation).await {
        warn!(session_id = %session_id, seq = turn.seq, error = %e, "invocation not persisted; turn marked partial");
        store.set_turn_status(session_id, turn.seq, TurnStatus::Partial).await?;
        turn.status = TurnStatus::Partial;
    }
    Ok(turn)
}

/// Commit partial turns whose invocation records are now present.
/// Returns how many turns were committed.
pub async fn reconcile_partial_turns(store: &dyn MemoryStore, session_id: &SessionKey) -> Result<usize> {
    let turns = store.load_turns(session_id).await?;
    let partial: Vec<&Turn> = turns.iter().filter(|t| !t.is_committed()).collect();
    if partial.is_empty() {
        return Ok(0);
    }

    let invocations = store.load_invocations(session_id).await?;
    let mut committed = 0;
    for turn in partial {
        let complete = turn
            .tool_results
            .iter()
            .all(|r| invocations.iter().any(|i| i.invocation_id == r.invocation_id));
        if complete {
            store.set_turn_status(session_id, turn.seq, TurnStatus::Committed).await?;
            committed += 1;
        }
    }
    if committed > 0 {
        info!(session_id = %session_id, committed, "partial turns reconciled");
    }
    Ok(committed)
}
