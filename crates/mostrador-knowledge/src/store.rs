//! Vector stores: in-memory cosine store and Qdrant over HTTP

use crate::{KnowledgeError, KnowledgeResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// A stored vector with its payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// Search hit. Higher score is better.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScoredDocument {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

impl ScoredDocument {
    /// Best-effort text of the payload for prompt injection.
    pub fn text(&self) -> String {
        for key in ["text", "content", "page_content"] {
            if let Some(s) = self.payload.get(key).and_then(Value::as_str) {
                return s.to_string();
            }
        }
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace points by id.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> KnowledgeResult<()>;

    /// Nearest neighbours by cosine similarity, best first.
    async fn search(&self, collection: &str, vector: &[f32], k: usize) -> KnowledgeResult<Vec<ScoredDocument>>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<VectorPoint>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> KnowledgeResult<()> {
        let mut collections = self.collections.write().await;
        let entries = collections.entry(collection.to_string()).or_default();
        for point in points {
            match entries.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => entries.push(point),
            }
        }
        Ok(())
    }

    async fn search(&self, collection: &str, vector: &[f32], k: usize) -> KnowledgeResult<Vec<ScoredDocument>> {
        let collections = self.collections.read().await;
        let entries = collections
            .get(collection)
            .ok_or_else(|| KnowledgeError::UnknownCollection(collection.to_string()))?;

        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|p| ScoredDocument {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Cosine similarity; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Qdrant REST client. Collections must be created with cosine distance.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// `<base>/collections/<collection>/<tail>`, each segment percent-encoded.
    fn collection_url(&self, collection: &str, tail: &[&str]) -> KnowledgeResult<Url> {
        if collection.is_empty() {
            return Err(KnowledgeError::UnknownCollection(String::new()));
        }
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| KnowledgeError::Endpoint(format!("invalid qdrant url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| KnowledgeError::Endpoint("qdrant url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("collections")
            .push(collection)
            .extend(tail);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response, collection: &str) -> KnowledgeResult<Value> {
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(KnowledgeError::UnknownCollection(collection.to_string()));
        }
        if !status.is_success() {
            return Err(KnowledgeError::Upstream {
                status: status.as_u16(),
                message: format!("qdrant request on '{}' failed", collection),
            });
        }
        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct QdrantHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Value,
}

/// Qdrant ids are unsigned integers or UUID strings.
fn point_id(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => json!(n),
        Err(_) => json!(id),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> KnowledgeResult<()> {
        let points: Vec<Value> = points
            .into_iter()
            .map(|p| json!({"id": point_id(&p.id), "vector": p.vector, "payload": p.payload}))
            .collect();
        debug!(collection, count = points.len(), "qdrant upsert");
        let mut url = self.collection_url(collection, &["points"])?;
        url.query_pairs_mut().append_pair("wait", "true");
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(&json!({"points": points}))
            .send()
            .await?;
        Self::check(response, collection).await.map(|_| ())
    }

    async fn search(&self, collection: &str, vector: &[f32], k: usize) -> KnowledgeResult<Vec<ScoredDocument>> {
        let url = self.collection_url(collection, &["points", "search"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({"vector": vector, "limit": k, "with_payload": true}))
            .send()
            .await?;
        let body = Self::check(response, collection).await?;
        let hits: Vec<QdrantHit> = serde_json::from_value(body.get("result").cloned().unwrap_or(Value::Null))
            .map_err(|e| KnowledgeError::Upstream { status: 200, message: e.to_string() })?;
        Ok(hits
            .into_iter()
            .map(|h| ScoredDocument {
                id: match h.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: h.score,
                payload: h.payload,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn payload_text_prefers_text_field() {
        let doc = ScoredDocument { id: "1".into(), score: 0.9, payload: json!({"text": "hola", "sku": "X"}) };
        assert_eq!(doc.text(), "hola");
        let doc = ScoredDocument { id: "2".into(), score: 0.9, payload: json!({"sku": "X"}) };
        assert_eq!(doc.text(), r#"{"sku":"X"}"#);
    }

    #[test]
    fn collection_names_stay_inside_their_segment() {
        let store = QdrantStore::new("http://qdrant:6333/", None);
        let url = store.collection_url("politicas", &["points", "search"]).unwrap();
        assert_eq!(url.as_str(), "http://qdrant:6333/collections/politicas/points/search");

        let url = store.collection_url("x/../../cluster?a=1", &["points", "search"]).unwrap();
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], "collections");
        assert_eq!(segments[2..], ["points", "search"]);
        assert!(url.query().is_none());

        let proxied = QdrantStore::new("https://proxy.cl/qdrant", None);
        let url = proxied.collection_url("politicas", &["points"]).unwrap();
        assert_eq!(url.path(), "/qdrant/collections/politicas/points");
        assert!(matches!(
            store.collection_url("", &["points"]),
            Err(KnowledgeError::UnknownCollection(_))
        ));
    }

    #[test]
    fn numeric_ids_are_sent_as_numbers() {
        assert_eq!(point_id("42"), json!(42));
        assert_eq!(point_id("5c56c793-69f3-4fbf-87e6-c4bf54c28c26"), json!("5c56c793-69f3-4fbf-87e6-c4bf54c28c26"));
    }
}
