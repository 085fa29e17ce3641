//! Tests for mostrador-knowledge: retriever over in-memory and Qdrant stores

use axum::extract::Path;
use axum::routing::{post, put};
use axum::{Json, Router};
use mostrador_knowledge::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn local_retriever() -> Retriever {
    Retriever::new(Arc::new(HashingEmbedder::new(128)), Arc::new(InMemoryVectorStore::new()))
}

fn docs() -> Vec<Document> {
    vec![
        Document { id: "1".into(), text: "filtro de aceite para motor diesel".into(), payload: json!({"sku": "FIL001"}) },
        Document { id: "2".into(), text: "pastillas de freno delanteras camion".into(), payload: json!({"sku": "FRE002"}) },
        Document { id: "3".into(), text: "ampolleta halogena h4 12v".into(), payload: Value::Null },
    ]
}

// ===========================================================================
// In-memory retrieval
// ===========================================================================

#[tokio::test]
async fn search_ranks_most_similar_first() {
    let retriever = local_retriever();
    assert_eq!(retriever.load("productos", docs()).await.unwrap(), 3);

    let hits = retriever.search("productos", "freno delantero camion", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "2");
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].payload["sku"], "FRE002");
}

#[tokio::test]
async fn load_stores_text_in_payload() {
    let retriever = local_retriever();
    retriever.load("productos", docs()).await.unwrap();
    let hits = retriever.search("productos", "ampolleta h4", 1).await.unwrap();
    assert_eq!(hits[0].text(), "ampolleta halogena h4 12v");
}

#[tokio::test]
async fn reloading_same_id_replaces_point() {
    let store = Arc::new(InMemoryVectorStore::new());
    let retriever = Retriever::new(Arc::new(HashingEmbedder::new(64)), store.clone());
    retriever.load("c", docs()).await.unwrap();
    retriever.load("c", docs()).await.unwrap();
    assert_eq!(store.count("c").await, 3);
}

#[tokio::test]
async fn unknown_collection_is_not_found() {
    let err = local_retriever().search("nada", "hola", 3).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::UnknownCollection(_)));
    let core: mostrador_core::Error = err.into();
    assert_eq!(core.kind(), mostrador_core::ErrorKind::NotFound);
}

// ===========================================================================
// Qdrant over HTTP
// ===========================================================================

#[tokio::test]
async fn qdrant_store_speaks_rest() {
    let upserts: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = upserts.clone();
    let router = Router::new()
        .route(
            "/collections/{name}/points",
            put(move |Path(_name): Path<String>, Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({"result": {"status": "completed"}, "status": "ok"}))
                }
            }),
        )
        .route(
            "/collections/{name}/points/search",
            post(|Path(name): Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(name, "productos");
                assert_eq!(body["limit"], 1);
                Json(json!({"result": [{"id": 7, "score": 0.91, "payload": {"text": "filtro"}}]}))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let store = Arc::new(QdrantStore::new(format!("http://{}", addr), Some("key".into())));
    let retriever = Retriever::new(Arc::new(HashingEmbedder::new(16)), store);
    retriever.load("productos", docs()).await.unwrap();
    let hits = retriever.search("productos", "filtro", 1).await.unwrap();

    assert_eq!(hits[0].id, "7");
    assert!((hits[0].score - 0.91).abs() < 1e-6);
    let body = upserts.lock().unwrap()[0].clone();
    assert_eq!(body["points"][0]["id"], 1);
    assert_eq!(body["points"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn qdrant_collection_name_is_one_path_segment() {
    let router = Router::new().route(
        "/collections/{name}/points/search",
        post(|Path(name): Path<String>| async move {
            Json(json!({"result": [{"id": 1, "score": 0.5, "payload": {"text": name}}]}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let store = Arc::new(QdrantStore::new(format!("http://{}", addr), None));
    let retriever = Retriever::new(Arc::new(HashingEmbedder::new(16)), store);
    let hits = retriever.search("politicas/../../aliases", "filtro", 1).await.unwrap();
    assert_eq!(hits[0].text(), "politicas/../../aliases");
}
