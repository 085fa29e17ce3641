//! Mostrador Knowledge - vector retrieval over named collections

pub mod embedder;
pub mod retriever;
pub mod store;

pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use retriever::{Document, Retriever};
pub use store::{cosine_similarity, InMemoryVectorStore, QdrantStore, ScoredDocument, VectorPoint, VectorStore};

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl From<KnowledgeError> for mostrador_core::Error {
    fn from(e: KnowledgeError) -> Self {
        use mostrador_core::Error;
        match &e {
            KnowledgeError::UnknownCollection(_) => Error::NotFound(e.to_string()),
            KnowledgeError::Upstream { status, .. } if *status >= 500 => {
                Error::upstream_transient("vector", e.to_string())
            }
            KnowledgeError::NetworkError(_) => Error::upstream_transient("vector", e.to_string()),
            _ => Error::upstream_fatal("vector", e.to_string()),
        }
    }
}
