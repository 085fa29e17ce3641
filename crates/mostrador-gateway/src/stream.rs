//! Newline-delimited JSON event streams

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use mostrador_agent::AgentEvent;
use std::convert::Infallible;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const NDJSON: &str = "application/x-ndjson";

/// Spawn `run` with an event sender and a token, and stream its events one
/// JSON object per line. Dropping the response body cancels the token.
pub fn ndjson_response<F, Fut>(run: F) -> Response
where
    F: FnOnce(mpsc::Sender<AgentEvent>, CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
    let cancel = CancellationToken::new();
    tokio::spawn(run(tx, cancel.clone()));

    let guard = cancel.drop_guard();
    let body = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            match serde_json::to_vec(&event) {
                Ok(mut line) => {
                    line.push(b'\n');
                    yield Ok::<_, Infallible>(Bytes::from(line));
                }
                Err(e) => warn!(error = %e, "event not serializable"),
            }
        }
    };

    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(body)).into_response()
}
