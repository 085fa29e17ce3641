//! Per-session admission control
//!
//! Turns of one session are strictly serialized, whichever agent or team
//! runs them. A second run on a busy session waits up to the configured
//! deadline or is rejected outright.

use dashmap::DashMap;
use mostrador_core::config::{BusyPolicy, RuntimeConfig};
use mostrador_core::{Error, Result, SessionKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type Slots = Arc<DashMap<SessionKey, Arc<Mutex<()>>>>;

/// Held for the whole turn, including detached tool tasks.
pub type SessionGuard = Arc<SessionSlot>;

/// Admission to one session. The slot is removed from the lock table
/// once nobody else holds or waits on it.
#[derive(Debug)]
pub struct SessionSlot {
    slots: Slots,
    session_id: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.guard.take();
        self.slots
            .remove_if(&self.session_id, |_, slot| Arc::strong_count(slot) == 1);
    }
}

pub struct SessionLocks {
    slots: Slots,
    policy: BusyPolicy,
    wait: Duration,
}

impl SessionLocks {
    pub fn new(policy: BusyPolicy, wait: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            policy,
            wait,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.busy_policy, Duration::from_millis(config.session_wait_ms))
    }

    pub async fn acquire(&self, session_id: &SessionKey) -> Result<SessionGuard> {
        let lock = self
            .slots
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match self.policy {
            BusyPolicy::Reject => lock.try_lock_owned().ok(),
            BusyPolicy::Wait => tokio::time::timeout(self.wait, lock.lock_owned()).await.ok(),
        };
        match guard {
            Some(guard) => Ok(Arc::new(SessionSlot {
                slots: self.slots.clone(),
                session_id: session_id.clone(),
                guard: Some(guard),
            })),
            None => {
                debug!(session_id = %session_id, "session busy");
                Err(Error::SessionBusy(session_id.to_string()))
            }
        }
    }

    pub fn is_busy(&self, session_id: &SessionKey) -> bool {
        self.slots
            .get(session_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Sessions currently holding or awaiting admission.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mostrador_core::ErrorKind;

    #[tokio::test]
    async fn reject_policy_fails_immediately() {
        let locks = SessionLocks::new(BusyPolicy::Reject, Duration::from_secs(5));
        let key = SessionKey::new("s1");
        let _held = locks.acquire(&key).await.unwrap();
        let err = locks.acquire(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionBusy);
        assert!(locks.is_busy(&key));
    }

    #[tokio::test]
    async fn wait_policy_admits_after_release() {
        let locks = Arc::new(SessionLocks::new(BusyPolicy::Wait, Duration::from_millis(500)));
        let key = SessionKey::new("s1");
        let held = locks.acquire(&key).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move { locks.acquire(&key).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn released_sessions_leave_no_slot() {
        let locks = SessionLocks::new(BusyPolicy::Reject, Duration::ZERO);
        for i in 0..100 {
            let guard = locks.acquire(&SessionKey::new(format!("s{}", i))).await.unwrap();
            let shared = guard.clone();
            drop(guard);
            assert_eq!(locks.len(), 1);
            drop(shared);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn slot_survives_while_a_waiter_is_queued() {
        let locks = Arc::new(SessionLocks::new(BusyPolicy::Wait, Duration::from_millis(500)));
        let key = SessionKey::new("s1");
        let held = locks.acquire(&key).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let guard = locks.acquire(&key).await.unwrap();
                locks.is_busy(&key) && drop_then_empty(&locks, guard)
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    fn drop_then_empty(locks: &SessionLocks, guard: SessionGuard) -> bool {
        drop(guard);
        locks.is_empty()
    }
}
