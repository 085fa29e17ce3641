//! Server-sent events framing shared by the HTTP providers

use crate::provider::{LlmError, LlmResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};

/// Incremental SSE decoder. Bytes are buffered until an event boundary
/// so multi-byte characters split across chunks decode intact.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk; returns the data payload of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some((end, separator)) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + separator).collect();
            if let Some(data) = event_data(&String::from_utf8_lossy(&block[..end])) {
                payloads.push(data);
            }
        }
        payloads
    }
}

fn find_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    (0..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

/// Joined `data:` lines of one event. Comments and other fields are skipped.
fn event_data(block: &str) -> Option<String> {
    let data: Vec<&str> = block
        .lines()
        .filter(|line| !line.starts_with(':'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();
    (!data.is_empty()).then(|| data.join("\n"))
}

/// Data payloads of an HTTP body carrying `text/event-stream`.
pub(crate) fn sse_payloads(
    body: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = LlmResult<String>> + Send {
    async_stream::stream! {
        let mut decoder = SseDecoder::default();
        tokio::pin!(body);
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for payload in decoder.push(&bytes) {
                        yield Ok(payload);
                    }
                }
                Err(e) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    break;
                }
            }
        }
    }
}
