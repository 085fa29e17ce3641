//! Store records and the state they replay into
//!
//! Every mutation is expressed as a [`Record`]. A store writes the record to
//! its journal first and applies it to memory only once the write succeeded,
//! so replaying a journal reproduces the exact state.

use async_trait::async_trait;
use mostrador_core::{Error, Result, Session, SessionKey, SessionSummary, ToolInvocation, Turn, TurnStatus, UserMemory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const SESSIONS_COLLECTION: &str = "agent_sessions";
pub const AUTH_COLLECTION: &str = "agent_auth_info";

/// `<agent>_memories`
pub fn memories_collection(agent_id: &str) -> String {
    format!("{}_memories", agent_id)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Session(Session),
    Turn(Turn),
    TurnStatus {
        session_id: SessionKey,
        seq: u64,
        status: TurnStatus,
    },
    Invocation(ToolInvocation),
    Memory(UserMemory),
    MemoryRemoved {
        agent_id: String,
        memory_id: String,
    },
    Summary {
        agent_id: String,
        summary: SessionSummary,
    },
    Auth {
        employee_code: String,
        record: Value,
    },
}

/// Collection directory and file name of one journal file.
pub type Location = (String, String);

pub fn session_location(session_id: &SessionKey) -> Location {
    (SESSIONS_COLLECTION.to_string(), format!("{}.jsonl", file_stem(session_id.as_str())))
}

pub fn memories_location(agent_id: &str) -> Location {
    (memories_collection(agent_id), "memories.jsonl".to_string())
}

pub fn summaries_location(agent_id: &str) -> Location {
    (memories_collection(agent_id), "summaries.jsonl".to_string())
}

pub fn auth_location() -> Location {
    (AUTH_COLLECTION.to_string(), "records.jsonl".to_string())
}

impl Record {
    /// Collection directory and file this record belongs to.
    pub fn location(&self) -> Location {
        match self {
            Record::Session(Session { session_id, .. })
            | Record::Turn(Turn { session_id, .. })
            | Record::TurnStatus { session_id, .. }
            | Record::Invocation(ToolInvocation { session_id, .. }) => session_location(session_id),
            Record::Memory(UserMemory { agent_id, .. }) | Record::MemoryRemoved { agent_id, .. } => {
                memories_location(agent_id)
            }
            Record::Summary { agent_id, .. } => summaries_location(agent_id),
            Record::Auth { .. } => auth_location(),
        }
    }
}

/// Injective, filesystem-safe rendering of an id.
pub fn file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{:02x}", b));
        }
    }
    out
}

#[derive(Default)]
pub(crate) struct SessionLog {
    pub meta: Option<Session>,
    pub turns: Vec<Turn>,
    pub invocations: Vec<ToolInvocation>,
}

#[derive(Default)]
pub(crate) struct State {
    pub sessions: HashMap<SessionKey, SessionLog>,
    /// Keyed by agent id.
    pub memories: HashMap<String, Vec<UserMemory>>,
    pub summaries: HashMap<(String, SessionKey), SessionSummary>,
    pub auth: HashMap<String, Value>,
}

impl State {
    pub fn next_seq(&self, session_id: &SessionKey) -> u64 {
        self.sessions
            .get(session_id)
            .and_then(|log| log.turns.last())
            .map_or(1, |turn| turn.seq + 1)
    }

    pub fn apply(&mut self, record: Record) {
        match record {
            Record::Session(session) => {
                let key = session.session_id.clone();
                self.sessions.entry(key).or_default().meta = Some(session);
            }
            Record::Turn(turn) => {
                self.sessions.entry(turn.session_id.clone()).or_default().turns.push(turn);
            }
            Record::TurnStatus { session_id, seq, status } => {
                if let Some(turn) = self
                    .sessions
                    .get_mut(&session_id)
                    .and_then(|log| log.turns.iter_mut().find(|t| t.seq == seq))
                {
                    turn.status = status;
                }
            }
            Record::Invocation(invocation) => {
                let log = self.sessions.entry(invocation.session_id.clone()).or_default();
                match log
                    .invocations
                    .iter_mut()
                    .find(|i| i.invocation_id == invocation.invocation_id)
                {
                    Some(existing) => *existing = invocation,
                    None => log.invocations.push(invocation),
                }
            }
            Record::Memory(memory) => {
                let memories = self.memories.entry(memory.agent_id.clone()).or_default();
                match memories.iter_mut().find(|m| m.memory_id == memory.memory_id) {
                    Some(existing) => *existing = memory,
                    None => memories.push(memory),
                }
            }
            Record::MemoryRemoved { agent_id, memory_id } => {
                if let Some(memories) = self.memories.get_mut(&agent_id) {
                    memories.retain(|m| m.memory_id != memory_id);
                }
            }
            Record::Summary { agent_id, summary } => {
                self.summaries.insert((agent_id, summary.session_id.clone()), summary);
            }
            Record::Auth { employee_code, record } => {
                self.auth.insert(employee_code, record);
            }
        }
    }
}

/// Durable sink for records. Writes must be complete before `write` returns.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn write(&self, record: &Record) -> Result<()>;
}

/// Keeps nothing; state lives only in the process.
pub struct NoJournal;

#[async_trait]
impl Journal for NoJournal {
    async fn write(&self, _record: &Record) -> Result<()> {
        Ok(())
    }
}

/// Append-only JSON lines, one directory per collection.
pub struct FileJournal {
    root: PathBuf,
}

impl FileJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read every record under the root. Unparseable lines are skipped
    /// with a warning; a torn final line is cut off so the next append
    /// starts on a line of its own.
    pub(crate) async fn replay(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        if !tokio::fs::try_exists(&self.root).await.map_err(persistence)? {
            return Ok(records);
        }

        let mut collections = read_dir_sorted(&self.root).await?;
        collections.retain(|p| p.is_dir());
        for collection in collections {
            for file in read_dir_sorted(&collection).await? {
                if file.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                    continue;
                }
                let content = read_repaired(&file).await?;
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Record>(line) {
                        Ok(record) => records.push(record),
                        Err(e) => warn!(file = %file.display(), line = line_no + 1, error = %e, "skipping bad record"),
                    }
                }
            }
        }
        Ok(records)
    }
}

/// File content up to its last newline. Anything after it is a write
/// that never completed and is truncated away on disk.
async fn read_repaired(file: &Path) -> Result<String> {
    let bytes = tokio::fs::read(file).await.map_err(persistence)?;
    let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    if complete < bytes.len() {
        warn!(file = %file.display(), torn_bytes = bytes.len() - complete, "truncating torn final record");
        let f = tokio::fs::OpenOptions::new()
            .write(true)
            .open(file)
            .await
            .map_err(persistence)?;
        f.set_len(complete as u64).await.map_err(persistence)?;
        f.sync_all().await.map_err(persistence)?;
    }
    Ok(String::from_utf8_lossy(&bytes[..complete]).into_owned())
}

async fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(persistence)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(persistence)? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn persistence(e: std::io::Error) -> Error {
    Error::Persistence(e.to_string())
}

#[async_trait]
impl Journal for FileJournal {
    async fn write(&self, record: &Record) -> Result<()> {
        let (collection, file) = record.location();
        let dir = self.root.join(collection);
        tokio::fs::create_dir_all(&dir).await.map_err(persistence)?;

        let mut line = serde_json::to_string(record).map_err(|e| Error::Persistence(e.to_string()))?;
        line.push('\n');
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(file))
            .await
            .map_err(persistence)?;
        f.write_all(line.as_bytes()).await.map_err(persistence)?;
        f.flush().await.map_err(persistence)?;
        Ok(())
    }
}
