//! Text-to-document retrieval over named collections

use crate::embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
use crate::store::{InMemoryVectorStore, QdrantStore, ScoredDocument, VectorPoint, VectorStore};
use crate::KnowledgeResult;
use mostrador_core::config::VectorConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// A document to be embedded and stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Qdrant when a URL is configured, otherwise a process-local store.
    /// OpenAI embeddings when a key is available, otherwise hashing.
    pub fn from_config(config: &VectorConfig, openai_api_key: Option<&str>) -> Self {
        let store: Arc<dyn VectorStore> = match &config.url {
            Some(url) => Arc::new(QdrantStore::new(url.clone(), config.api_key.clone())),
            None => Arc::new(InMemoryVectorStore::new()),
        };
        let embedder: Arc<dyn Embedder> = match openai_api_key {
            Some(key) => Arc::new(OpenAiEmbedder::new(key, config.embedding_model.clone(), config.embedding_dim)),
            None => Arc::new(HashingEmbedder::default()),
        };
        info!(
            qdrant = config.url.is_some(),
            dimension = embedder.dimension(),
            "knowledge retriever ready"
        );
        Self::new(embedder, store)
    }

    /// Top-`k` documents for `query`, scored by cosine similarity.
    pub async fn search(&self, collection: &str, query: &str, k: usize) -> KnowledgeResult<Vec<ScoredDocument>> {
        let started = Instant::now();
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let vector = vectors.pop().unwrap_or_default();
        let hits = self.store.search(collection, &vector, k).await?;
        debug!(
            collection,
            k,
            hits = hits.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "knowledge search"
        );
        Ok(hits)
    }

    /// Bulk upsert; the document text is stored in the payload as `text`.
    pub async fn load(&self, collection: &str, docs: Vec<Document>) -> KnowledgeResult<usize> {
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let points: Vec<VectorPoint> = docs
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                let mut payload = match doc.payload {
                    Value::Object(map) => Value::Object(map),
                    Value::Null => Value::Object(Default::default()),
                    other => serde_json::json!({ "value": other }),
                };
                if payload.get("text").is_none() {
                    payload["text"] = Value::String(doc.text);
                }
                VectorPoint { id: doc.id, vector, payload }
            })
            .collect();
        let count = points.len();
        self.store.upsert(collection, points).await?;
        info!(collection, count, "knowledge loaded");
        Ok(count)
    }
}
