//! Agents are built from descriptors and held in a registry keyed by id

use crate::hooks::PostTurnHooks;
use crate::locks::SessionLocks;
use crate::runtime::{AgentEvent, AgentRuntime, RunOutcome, RunRequest};
use mostrador_core::config::RuntimeConfig;
use mostrador_core::{AgentDescriptor, Error, Result};
use mostrador_knowledge::Retriever;
use mostrador_llm::{LlmProvider, ProviderRegistry};
use mostrador_memory::{Distiller, MemoryStore, StoreRegistry, Summarizer};
use mostrador_tools::ToolRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AgentFactory {
    providers: ProviderRegistry,
    stores: StoreRegistry,
    tools: Arc<ToolRegistry>,
    retriever: Option<Retriever>,
    locks: Arc<SessionLocks>,
    config: RuntimeConfig,
}

impl AgentFactory {
    pub fn new(providers: ProviderRegistry, stores: StoreRegistry, tools: Arc<ToolRegistry>, config: RuntimeConfig) -> Self {
        Self {
            providers,
            stores,
            tools,
            retriever: None,
            locks: Arc::new(SessionLocks::from_config(&config)),
            config,
        }
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    /// Admission locks shared by every agent this factory builds.
    pub fn locks(&self) -> Arc<SessionLocks> {
        self.locks.clone()
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn build(&self, descriptor: &AgentDescriptor) -> Result<AgentRuntime> {
        let (provider, model) = self.providers.resolve(&descriptor.model_ref)?;
        let store = self.stores.memory(&descriptor.store)?;
        let hooks = self.hooks_for(descriptor, store.clone(), provider.clone(), &model)?;

        let mut runtime = AgentRuntime::new(
            descriptor.clone(),
            provider,
            model,
            store,
            self.tools.clone(),
            self.config.clone(),
        )?
        .with_locks(self.locks.clone())
        .with_hooks(hooks);

        if let Some(knowledge) = &descriptor.knowledge {
            match &self.retriever {
                Some(retriever) => runtime = runtime.with_retriever(retriever.clone()),
                None => warn!(
                    agent_id = %descriptor.agent_id,
                    collection = %knowledge.collection,
                    "no retriever configured; knowledge disabled"
                ),
            }
        }

        info!(
            agent_id = %descriptor.agent_id,
            model_ref = %descriptor.model_ref,
            store = %descriptor.store,
            tools = runtime.tool_definitions().len(),
            "agent ready"
        );
        Ok(runtime)
    }

    pub fn build_all(&self, descriptors: &[AgentDescriptor]) -> Result<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for descriptor in descriptors {
            registry.insert(Arc::new(self.build(descriptor)?))?;
        }
        Ok(registry)
    }

    fn hooks_for(
        &self,
        descriptor: &AgentDescriptor,
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn LlmProvider>,
        model: &str,
    ) -> Result<PostTurnHooks> {
        let policy = &descriptor.memory_policy;
        let (provider, model) = match &policy.memory_model_ref {
            Some(model_ref) => self.providers.resolve(model_ref)?,
            None => (provider, model.to_string()),
        };
        let limit = Duration::from_secs(self.config.model_timeout_s);
        let distiller = policy
            .enable_user_memories
            .then(|| Distiller::new(provider.clone(), model.clone()).with_timeout(limit));
        let summarizer = policy
            .enable_session_summaries
            .then(|| Summarizer::new(provider.clone(), model.clone()).with_timeout(limit));
        Ok(PostTurnHooks::new(
            descriptor.agent_id.clone(),
            policy.clone(),
            store,
            distiller,
            summarizer,
        ))
    }
}

/// Public listing entry for an agent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub profile_tags: Vec<String>,
}

impl From<&AgentDescriptor> for AgentInfo {
    fn from(d: &AgentDescriptor) -> Self {
        Self {
            agent_id: d.agent_id.clone(),
            name: d.name.clone(),
            description: d.description.clone(),
            profile_tags: d.profile_tags.clone(),
        }
    }
}

/// Agents in declaration order.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentRuntime>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent: Arc<AgentRuntime>) -> Result<()> {
        if self.get(agent.agent_id()).is_some() {
            return Err(Error::ConfigError(format!("duplicate agent id '{}'", agent.agent_id())));
        }
        self.agents.push(agent);
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        self.agents.iter().find(|a| a.agent_id() == agent_id).cloned()
    }

    pub fn require(&self, agent_id: &str) -> Result<Arc<AgentRuntime>> {
        self.get(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent '{}'", agent_id)))
    }

    pub fn list(&self) -> Vec<AgentInfo> {
        self.agents.iter().map(|a| AgentInfo::from(a.descriptor())).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub async fn run(
        &self,
        agent_id: &str,
        request: RunRequest,
        events: Option<mpsc::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        self.require(agent_id)?.run(request, events, cancel).await
    }
}
