//! Post-turn hooks: memory distillation and session-summary rewrite
//!
//! Best-effort. Failures are logged and never reach the caller.

use mostrador_core::{MemoryPolicy, SessionKey};
use mostrador_memory::{Distiller, MemoryStore, Summarizer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns fed to the summarizer on each rewrite.
const SUMMARY_WINDOW: usize = 20;

/// The exchange a hook run looks at.
#[derive(Clone, Debug)]
pub struct Exchange {
    pub user_id: String,
    pub session_id: SessionKey,
    pub user_message: String,
    pub assistant_message: String,
}

pub struct PostTurnHooks {
    agent_id: String,
    policy: MemoryPolicy,
    store: Arc<dyn MemoryStore>,
    distiller: Option<Distiller>,
    summarizer: Option<Summarizer>,
}

impl PostTurnHooks {
    pub fn new(
        agent_id: impl Into<String>,
        policy: MemoryPolicy,
        store: Arc<dyn MemoryStore>,
        distiller: Option<Distiller>,
        summarizer: Option<Summarizer>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            policy,
            store,
            distiller,
            summarizer,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.distiller.is_none() && self.summarizer.is_none()
    }

    pub async fn run(&self, exchange: &Exchange) {
        if let Some(distiller) = &self.distiller {
            let result = distiller
                .distill_into(
                    self.store.as_ref(),
                    &self.policy,
                    &exchange.user_id,
                    &self.agent_id,
                    &exchange.user_message,
                    &exchange.assistant_message,
                )
                .await;
            match result {
                Ok(n) => debug!(agent_id = %self.agent_id, user_id = %exchange.user_id, memories = n, "distillation done"),
                Err(e) => warn!(agent_id = %self.agent_id, error = %e, "memory distillation failed"),
            }
        }

        if let Some(summarizer) = &self.summarizer {
            if let Err(e) = summarizer
                .rewrite(self.store.as_ref(), &self.agent_id, &exchange.session_id, SUMMARY_WINDOW)
                .await
            {
                warn!(agent_id = %self.agent_id, session_id = %exchange.session_id, error = %e, "session summary failed");
            }
        }
    }
}
