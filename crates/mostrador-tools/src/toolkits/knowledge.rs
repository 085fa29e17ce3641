//! Knowledge-base search as a tool

use crate::descriptor::{RetryPolicy, ToolDescriptor};
use crate::error::ToolError;
use crate::registry::{InvocationCtx, ToolHandler, Toolkit};
use async_trait::async_trait;
use mostrador_core::AgentDescriptor;
use mostrador_knowledge::{KnowledgeError, Retriever};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const TOOL_ID: &str = "knowledge";

const DEFAULT_K: usize = 5;
const MAX_K: usize = 20;

impl From<KnowledgeError> for ToolError {
    fn from(e: KnowledgeError) -> Self {
        match e {
            KnowledgeError::UnknownCollection(c) => ToolError::Input(format!("unknown collection '{}'", c)),
            KnowledgeError::Upstream { status, message } => ToolError::from_status(status, message),
            KnowledgeError::NetworkError(e) => ToolError::from(e),
            KnowledgeError::Embedding(m) => ToolError::transient(None, m),
            KnowledgeError::Endpoint(m) => ToolError::fatal(None, m),
        }
    }
}

/// Each agent searches only the collections granted to it.
pub struct KnowledgeToolkit {
    retriever: Retriever,
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl KnowledgeToolkit {
    pub fn new(retriever: Retriever) -> Self {
        Self {
            retriever,
            grants: BTreeMap::new(),
        }
    }

    pub fn allow(mut self, agent_id: impl Into<String>, collection: impl Into<String>) -> Self {
        self.grants.entry(agent_id.into()).or_default().insert(collection.into());
        self
    }

    /// Grant every agent the collection of its knowledge reference.
    pub fn for_agents(retriever: Retriever, agents: &[AgentDescriptor]) -> Self {
        agents
            .iter()
            .filter_map(|agent| agent.knowledge.as_ref().map(|k| (&agent.agent_id, &k.collection)))
            .fold(Self::new(retriever), |toolkit, (agent_id, collection)| {
                toolkit.allow(agent_id.clone(), collection.clone())
            })
    }

    fn check_grant(&self, agent_id: &str, collection: &str) -> Result<(), ToolError> {
        let granted = self
            .grants
            .get(agent_id)
            .is_some_and(|collections| collections.contains(collection));
        if granted {
            Ok(())
        } else {
            Err(ToolError::Policy(format!(
                "collection '{}' is not available to this agent",
                collection
            )))
        }
    }
}

#[async_trait]
impl ToolHandler for KnowledgeToolkit {
    async fn call(&self, op_name: &str, args: Value, ctx: &InvocationCtx) -> Result<Value, ToolError> {
        if op_name != "search" {
            return Err(ToolError::UnknownOperation(format!("{}.{}", TOOL_ID, op_name)));
        }
        let collection = args.get("collection").and_then(Value::as_str).unwrap_or_default();
        self.check_grant(&ctx.agent_id, collection)?;
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        let k = args
            .get("k")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_K, |k| (k as usize).clamp(1, MAX_K));

        let hits = self.retriever.search(collection, query, k).await?;
        Ok(Value::Array(
            hits.iter()
                .map(|hit| json!({"id": hit.id, "score": hit.score, "text": hit.text()}))
                .collect(),
        ))
    }
}

impl Toolkit for KnowledgeToolkit {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            TOOL_ID,
            "search",
            "Busca documentos relevantes en una colección de la base de conocimiento.",
            json!({
                "type": "object",
                "properties": {
                    "collection": {"type": "string", "description": "Nombre de la colección"},
                    "query": {"type": "string", "description": "Texto a buscar"},
                    "k": {"type": "integer", "description": "Cantidad de resultados (1-20)"}
                },
                "required": ["collection", "query"]
            }),
        )
        .returns(json!({"type": "array"}))
        .cached(300)
        .retry(RetryPolicy::gateway_errors(2))]
    }
}
