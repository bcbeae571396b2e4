//! Upstream (`OpenAI`-compatible) streaming client.
//!
//! The relay never builds its own HTTP client: it receives something
//! implementing [`Upstream`] at call time. [`OpenAiClient`] is the production
//! implementation; tests substitute in-memory byte streams.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::json;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::sse::{FrameReassembler, ParseResult};
use crate::core::config::AppConfig;
use crate::core::models::UpstreamRequest;
use crate::errors::RelayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Type alias for the boxed upstream byte stream.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, RelayError>> + Send>>;

/// Result of opening the upstream connection.
pub enum UpstreamResponse {
    /// Success status; the body is the record stream.
    Streaming(ByteStream),
    /// Non-success status with the body read as text.
    Rejected { status: u16, body: String },
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming(_) => f.write_str("Streaming(..)"),
            Self::Rejected { status, body } => f
                .debug_struct("Rejected")
                .field("status", status)
                .field("body", body)
                .finish(),
        }
    }
}

/// Connection handle the relay opens the upstream stream through.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Opens the streaming request.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UpstreamConnection` when the provider cannot be
    /// reached. A reachable provider answering with an error status is not an
    /// `Err`; it comes back as [`UpstreamResponse::Rejected`].
    async fn open(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, RelayError>;
}

/// Streaming chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    org_id: Option<String>,
    endpoint: String,
}

impl OpenAiClient {
    /// Builds a client against the configured endpoint.
    ///
    /// Only a connect timeout is set; generations may legitimately stream for
    /// a long time.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` when the API key is missing or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, RelayError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| RelayError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            org_id: config.openai_org_id.clone(),
            endpoint: config.completions_url(),
        })
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap, RelayError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth_value = format!("Bearer {}", self.api_key)
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid Authorization header: {e}")))?;
        headers.insert("Authorization", auth_value);

        let accept_value = "text/event-stream"
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid Accept header: {e}")))?;
        headers.insert("Accept", accept_value);

        if let Some(org) = &self.org_id {
            let org_value = org.parse().map_err(|e| {
                RelayError::Config(format!("Invalid OpenAI-Organization header: {e}"))
            })?;
            headers.insert("OpenAI-Organization", org_value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl Upstream for OpenAiClient {
    async fn open(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, RelayError> {
        #[cfg(feature = "debug-logs")]
        info!("Using streaming prompt:\n{:?}", request.messages);

        #[cfg(not(feature = "debug-logs"))]
        info!(
            model = %request.model,
            messages = request.messages.len(),
            "Opening upstream stream"
        );

        let request_body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true }
        });

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                format!("Failed to read error response body (status {status}): {e}")
            });
            return Ok(UpstreamResponse::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::from));
        Ok(UpstreamResponse::Streaming(Box::pin(byte_stream)))
    }
}

/// Lazily yields payloads from an upstream body.
///
/// Each call to [`PayloadStream::next_payload`] reads at most as many chunks
/// as it takes to complete one record.
pub struct PayloadStream {
    byte_stream: ByteStream,
    reassembler: FrameReassembler,
    pending: VecDeque<ParseResult>,
    chunks_read: usize,
    completed: bool,
}

impl std::fmt::Debug for PayloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadStream")
            .field("completed", &self.completed)
            .field("chunks_read", &self.chunks_read)
            .field("pending_len", &self.pending.len())
            .field("buffer_len", &self.reassembler.remaining_buffer().len())
            .finish_non_exhaustive()
    }
}

impl PayloadStream {
    #[must_use]
    pub fn new(byte_stream: ByteStream) -> Self {
        Self {
            byte_stream,
            reassembler: FrameReassembler::new(),
            pending: VecDeque::new(),
            chunks_read: 0,
            completed: false,
        }
    }

    /// Returns the next payload, or `None` once the sequence has ended.
    ///
    /// The sequence ends at `[DONE]` or, after a final flush, at the end of
    /// the body.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::UpstreamRead` if reading the body fails. The
    /// stream is finished afterwards.
    pub async fn next_payload(&mut self) -> Result<Option<String>, RelayError> {
        loop {
            // Results from one chunk are queued so several records in a
            // single read are never dropped.
            if let Some(result) = self.pending.pop_front() {
                match result {
                    ParseResult::Payload(payload) => return Ok(Some(payload)),
                    ParseResult::Done => {
                        debug!(chunks = self.chunks_read, "Upstream sent completion marker");
                        self.finish();
                        return Ok(None);
                    }
                }
            }
            if self.completed {
                return Ok(None);
            }

            match self.byte_stream.next().await {
                Some(Ok(bytes)) => {
                    self.chunks_read += 1;
                    self.pending.extend(self.reassembler.feed(&bytes));
                }
                Some(Err(e)) => {
                    self.finish();
                    return Err(e);
                }
                None => {
                    debug!(chunks = self.chunks_read, "Upstream body ended");
                    self.pending.extend(self.reassembler.finish());
                    self.completed = true;
                }
            }
        }
    }

    /// Number of chunks read from the body so far.
    #[must_use]
    pub const fn chunks_read(&self) -> usize {
        self.chunks_read
    }

    /// Returns `true` if the stream has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed && self.pending.is_empty()
    }

    fn finish(&mut self) {
        self.completed = true;
        self.pending.clear();
    }
}
