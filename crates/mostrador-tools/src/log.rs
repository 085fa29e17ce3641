//! Bounded per-session invocation log
//!
//! Keeps the last `capacity` invocations of at most `max_sessions`
//! sessions; the least recently active session is forgotten first.

use lru::LruCache;
use mostrador_core::{SessionKey, ToolInvocation};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;

pub const DEFAULT_MAX_SESSIONS: usize = 4096;

pub struct InvocationLog {
    capacity: usize,
    sessions: Mutex<LruCache<SessionKey, VecDeque<ToolInvocation>>>,
}

impl InvocationLog {
    pub fn new(capacity: usize) -> Self {
        Self::with_max_sessions(capacity, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_max_sessions(capacity: usize, max_sessions: usize) -> Self {
        let max_sessions = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            capacity: capacity.max(1),
            sessions: Mutex::new(LruCache::new(max_sessions)),
        }
    }

    pub fn record(&self, invocation: ToolInvocation) {
        let mut sessions = self.sessions.lock();
        let entries = sessions.get_or_insert_mut(invocation.session_id.clone(), VecDeque::new);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(invocation);
    }

    /// Oldest first.
    pub fn for_session(&self, session_id: &SessionKey) -> Vec<ToolInvocation> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find(&self, session_id: &SessionKey, invocation_id: &str) -> Option<ToolInvocation> {
        self.sessions
            .lock()
            .get(session_id)?
            .iter()
            .find(|i| i.invocation_id == invocation_id)
            .cloned()
    }

    /// Sessions currently held.
    pub fn sessions(&self) -> usize {
        self.sessions.lock().len()
    }
}
