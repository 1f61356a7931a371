//! Streaming HTTP client for the chat backend.
//!
//! The backend answers `POST {endpoint}` with a plain text body that grows as
//! the model writes. `ChatTransport::open` turns that body into a stream of
//! `StreamEvent`s that always ends with exactly one `Closed` or `Failed`.

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::message::WireMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    #[serde(rename = "customerId")]
    pub customer_id: u64,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("chat backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response stream broke off: {0}")]
    Body(#[source] reqwest::Error),
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(String),
    Closed,
    Failed(Arc<TransportError>),
}

type BodyStream = BoxStream<'static, reqwest::Result<Vec<u8>>>;

enum Phase {
    Connect(reqwest::RequestBuilder),
    Body(BodyStream, Utf8Decoder),
    Finish,
    Done,
}

#[derive(Debug, Clone)]
pub struct ChatTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl ChatTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        ChatTransport {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Start a request. Nothing is sent until the stream is polled.
    pub fn open(&self, request: ChatRequest) -> BoxStream<'static, StreamEvent> {
        tracing::debug!(
            "POST {} with {} messages",
            self.endpoint,
            request.messages.len()
        );
        let builder = self.client.post(&self.endpoint).json(&request);
        stream::unfold(Phase::Connect(builder), step).boxed()
    }
}

async fn connect(builder: reqwest::RequestBuilder) -> Result<BodyStream, TransportError> {
    let response = builder.send().await.map_err(TransportError::Request)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response
        .bytes_stream()
        .map(|item| item.map(|bytes| bytes.to_vec()))
        .boxed())
}

fn failed(error: TransportError) -> StreamEvent {
    tracing::warn!("Chat transport failed: {error}");
    StreamEvent::Failed(Arc::new(error))
}

async fn step(mut phase: Phase) -> Option<(StreamEvent, Phase)> {
    loop {
        phase = match phase {
            Phase::Connect(builder) => match connect(builder).await {
                Ok(body) => Phase::Body(body, Utf8Decoder::default()),
                Err(e) => return Some((failed(e), Phase::Done)),
            },
            Phase::Body(mut body, mut decoder) => match body.next().await {
                Some(Ok(bytes)) => {
                    let text = decoder.push(&bytes);
                    if text.is_empty() {
                        Phase::Body(body, decoder)
                    } else {
                        return Some((StreamEvent::Chunk(text), Phase::Body(body, decoder)));
                    }
                }
                Some(Err(e)) => return Some((failed(TransportError::Body(e)), Phase::Done)),
                None => {
                    let rest = decoder.finish();
                    if rest.is_empty() {
                        return Some((StreamEvent::Closed, Phase::Done));
                    }
                    return Some((StreamEvent::Chunk(rest), Phase::Finish));
                }
            },
            Phase::Finish => return Some((StreamEvent::Closed, Phase::Done)),
            Phase::Done => return None,
        };
    }
}

/// Incremental UTF-8 decoding: a character split across two network reads is
/// held back until its remaining bytes arrive.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), Some(e.error_len())),
            };
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));

            match invalid {
                None => {
                    self.pending.clear();
                    return out;
                }
                Some(Some(len)) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                // Incomplete sequence at the end; wait for more bytes.
                Some(None) => {
                    self.pending.drain(..valid);
                    return out;
                }
            }
        }
    }

    /// Whatever is still held back, decoded lossily.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
