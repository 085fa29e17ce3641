//! Teams built from configuration, keyed by team id

use crate::team::{RoutingTeam, TeamOutcome};
use mostrador_agent::{AgentEvent, AgentFactory, AgentRegistry, RunRequest};
use mostrador_core::{Error, Result, TeamDescriptor};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Public listing entry for a team.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TeamInfo {
    pub team_id: String,
    pub name: String,
    pub description: String,
    pub profile_tags: Vec<String>,
    pub members: Vec<String>,
}

impl From<&TeamDescriptor> for TeamInfo {
    fn from(d: &TeamDescriptor) -> Self {
        Self {
            team_id: d.team_id.clone(),
            name: d.name.clone(),
            description: d.description.clone(),
            profile_tags: d.profile_tags.clone(),
            members: d.members.iter().map(|m| m.agent_id.clone()).collect(),
        }
    }
}

#[derive(Clone, Default)]
pub struct TeamRegistry {
    teams: Vec<Arc<RoutingTeam>>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members resolve against already-built agents; the classifier model
    /// and the team store come from the factory's registries.
    pub fn build(descriptors: &[TeamDescriptor], factory: &AgentFactory, agents: &AgentRegistry) -> Result<Self> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            let (provider, model) = factory.providers().resolve(&descriptor.model_ref)?;
            let store = factory.stores().memory(&descriptor.store)?;
            let members = descriptor
                .members
                .iter()
                .map(|m| {
                    agents.get(&m.agent_id).ok_or_else(|| {
                        Error::ConfigError(format!(
                            "team '{}' references unknown agent '{}'",
                            descriptor.team_id, m.agent_id
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let team = RoutingTeam::new(
                descriptor.clone(),
                provider,
                model,
                members,
                store,
                factory.locks(),
                factory.runtime_config(),
            )?;
            info!(team_id = %descriptor.team_id, members = descriptor.members.len(), "team ready");
            registry.insert(Arc::new(team))?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, team: Arc<RoutingTeam>) -> Result<()> {
        if self.get(team.team_id()).is_some() {
            return Err(Error::ConfigError(format!("duplicate team id '{}'", team.team_id())));
        }
        self.teams.push(team);
        Ok(())
    }

    pub fn get(&self, team_id: &str) -> Option<Arc<RoutingTeam>> {
        self.teams.iter().find(|t| t.team_id() == team_id).cloned()
    }

    pub fn require(&self, team_id: &str) -> Result<Arc<RoutingTeam>> {
        self.get(team_id)
            .ok_or_else(|| Error::NotFound(format!("team '{}'", team_id)))
    }

    pub fn list(&self) -> Vec<TeamInfo> {
        self.teams.iter().map(|t| TeamInfo::from(t.descriptor())).collect()
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    pub async fn route(
        &self,
        team_id: &str,
        request: RunRequest,
        events: Option<mpsc::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<TeamOutcome> {
        self.require(team_id)?.route(request, events, cancel).await
    }
}
