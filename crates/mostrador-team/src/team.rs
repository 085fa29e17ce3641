//! Routing team - classify, delegate to exactly one member, keep a team log

use crate::classifier::{choose, classifier_input, parse_decision, system_prompt, Decision};
use mostrador_agent::{AgentEvent, AgentRuntime, RunRequest, SessionLocks};
use mostrador_core::config::RuntimeConfig;
use mostrador_core::{AgentDescriptor, Error, Result, Role, SessionKey, TeamDescriptor, Turn, TurnDraft};
use mostrador_llm::{LlmMessage, LlmProvider, LlmRequest};
use mostrador_memory::{recent_conversation, MemoryStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Prefixed to the member's answer after a misrouted delegation.
pub const APOLOGY: &str = "Disculpa la confusión. ";

const DELEGATION_PREFIX: &str = "delegated_to=";
const CLASSIFIER_CONTEXT_TURNS: usize = 6;

/// Session a member keeps for one team session.
pub fn member_session(session_id: &SessionKey, agent_id: &str) -> SessionKey {
    SessionKey::new(format!("{}::{}", session_id, agent_id))
}

/// Member named by the latest delegation record in a team log.
pub fn previous_member(turns: &[Turn]) -> Option<String> {
    turns
        .iter()
        .rev()
        .filter(|t| t.role == Role::System)
        .find_map(|t| t.content.strip_prefix(DELEGATION_PREFIX))
        .map(str::to_string)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TeamOutcome {
    pub message: String,
    /// Seq of the answer in the team session.
    pub turn_seq: u64,
    pub member: String,
}

pub struct RoutingTeam {
    descriptor: TeamDescriptor,
    provider: Arc<dyn LlmProvider>,
    model: String,
    /// In member order.
    members: Vec<Arc<AgentRuntime>>,
    system_prompt: String,
    store: Arc<dyn MemoryStore>,
    locks: Arc<SessionLocks>,
    classifier_timeout: Duration,
}

impl RoutingTeam {
    pub fn new(
        descriptor: TeamDescriptor,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        members: Vec<Arc<AgentRuntime>>,
        store: Arc<dyn MemoryStore>,
        locks: Arc<SessionLocks>,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        if descriptor.members.is_empty() {
            return Err(Error::ConfigError(format!("team '{}' has no members", descriptor.team_id)));
        }
        let matches = members.len() == descriptor.members.len()
            && members
                .iter()
                .zip(&descriptor.members)
                .all(|(agent, member)| agent.agent_id() == member.agent_id);
        if !matches {
            return Err(Error::ConfigError(format!(
                "team '{}' members do not match its agents",
                descriptor.team_id
            )));
        }

        let agents: Vec<&AgentDescriptor> = members.iter().map(|m| m.descriptor()).collect();
        let system_prompt = system_prompt(&descriptor, &agents);
        Ok(Self {
            descriptor,
            provider,
            model: model.into(),
            members,
            system_prompt,
            store,
            locks,
            classifier_timeout: Duration::from_secs(config.model_timeout_s),
        })
    }

    pub fn descriptor(&self) -> &TeamDescriptor {
        &self.descriptor
    }

    pub fn team_id(&self) -> &str {
        &self.descriptor.team_id
    }

    /// Route one message. With `events`, the member's stream is forwarded
    /// and the team's own `final` (or `error`) event closes it.
    pub async fn route(
        &self,
        request: RunRequest,
        events: Option<mpsc::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<TeamOutcome> {
        let result = self.route_admitted(&request, events.as_ref(), &cancel).await;
        if let (Err(e), Some(tx)) = (&result, &events) {
            let _ = tx.send(AgentEvent::from_error(e)).await;
        }
        result
    }

    async fn route_admitted(
        &self,
        request: &RunRequest,
        events: Option<&mpsc::Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<TeamOutcome> {
        if request.message.trim().is_empty() {
            return Err(Error::Input("message is empty".into()));
        }
        let team_id = self.team_id();
        let session_id = &request.session_id;
        let _guard = self.locks.acquire(session_id).await?;

        self.store.touch_session(session_id, &request.user_id, team_id).await?;
        let turns = self.store.load_turns(session_id).await?;
        let previous = previous_member(&turns);
        let recent = recent_conversation(turns, CLASSIFIER_CONTEXT_TURNS);

        let decision = self
            .classify(&request.message, previous.as_deref(), &recent, cancel)
            .await;
        let route = choose(
            decision.as_ref(),
            &request.message,
            &self.descriptor.members,
            previous.as_deref(),
        );
        info!(
            team_id,
            session_id = %session_id,
            member = %route.member,
            source = route.source.as_str(),
            misrouted = route.misrouted,
            "message routed"
        );

        let member = self
            .members
            .iter()
            .find(|m| m.agent_id() == route.member)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("team '{}' has no member '{}'", team_id, route.member)))?;

        self.store
            .append_turn(session_id, TurnDraft::user(request.message.clone()))
            .await?;
        self.store
            .append_turn(
                session_id,
                TurnDraft::system(format!("{}{}", DELEGATION_PREFIX, route.member)),
            )
            .await?;

        let member_request = RunRequest {
            session_id: member_session(session_id, &route.member),
            user_id: request.user_id.clone(),
            message: request.message.clone(),
            stream_intermediate_steps: request.stream_intermediate_steps,
        };
        let apology = route.misrouted.then_some(APOLOGY);

        let outcome = match events {
            Some(tx) => {
                let (member_tx, member_rx) = mpsc::channel(64);
                let (result, ()) = tokio::join!(
                    member.run(member_request, Some(member_tx), cancel.clone()),
                    forward(member_rx, tx, apology),
                );
                result?
            }
            None => member.run(member_request, None, cancel.clone()).await?,
        };

        let message = match apology {
            Some(apology) => format!("{}{}", apology, outcome.message),
            None => outcome.message,
        };
        let turn = self
            .store
            .append_turn(session_id, TurnDraft::assistant(message.clone()))
            .await?;

        if let Some(tx) = events {
            let _ = tx
                .send(AgentEvent::Final {
                    message: message.clone(),
                    turn_seq: turn.seq,
                })
                .await;
        }

        Ok(TeamOutcome {
            message,
            turn_seq: turn.seq,
            member: route.member,
        })
    }

    /// `None` when the classifier fails, times out or answers off-format.
    async fn classify(
        &self,
        message: &str,
        previous: Option<&str>,
        recent: &[Turn],
        cancel: &CancellationToken,
    ) -> Option<Decision> {
        let request = LlmRequest {
            model: self.model.clone(),
            messages: vec![LlmMessage::user(classifier_input(message, previous, recent))],
            system: Some(self.system_prompt.clone()),
            max_tokens: Some(256),
            temperature: Some(0.0),
            ..Default::default()
        };
        let completion = tokio::time::timeout(
            self.classifier_timeout,
            self.provider.complete(request, Some(cancel.clone())),
        )
        .await;
        match completion {
            Ok(Ok(completion)) => {
                let decision = parse_decision(&completion.text());
                if decision.is_none() {
                    warn!(team_id = %self.team_id(), "classifier answer unparseable");
                }
                decision
            }
            Ok(Err(e)) => {
                warn!(team_id = %self.team_id(), error = %e, "classifier failed");
                None
            }
            Err(_) => {
                warn!(team_id = %self.team_id(), "classifier timed out");
                None
            }
        }
    }
}

/// Relay member events. The member's `final` and `error` are replaced by
/// the team's own.
async fn forward(mut rx: mpsc::Receiver<AgentEvent>, tx: &mpsc::Sender<AgentEvent>, apology: Option<&str>) {
    if let Some(apology) = apology {
        let _ = tx
            .send(AgentEvent::Chunk {
                content: apology.to_string(),
            })
            .await;
    }
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Final { .. } | AgentEvent::Error { .. } => {}
            other => {
                let _ = tx.send(other).await;
            }
        }
    }
}
