//! Relays an upstream generation stream to a downstream event-stream client.
//!
//! One invocation owns its reassembler and state; nothing is shared between
//! requests. The relay never retries: any upstream failure ends the
//! invocation with an `event: error` frame.

use tracing::{debug, error, info, warn};

use super::frames::{self, EVENT_STREAM_HEADERS};
use super::sink::EventSink;
use crate::ai::client::{PayloadStream, Upstream, UpstreamResponse};
use crate::core::models::{ChatCompletionChunk, UpstreamRequest, UsageRecord};
use crate::errors::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Open,
    Streaming,
    Terminating,
    Closed,
}

/// Why the relay stopped.
#[derive(Debug)]
pub enum Termination {
    /// Upstream finished; `event: done` was written.
    Completed,
    /// Upstream failed; `event: error` was written.
    Failed(RelayError),
    /// The client went away; no terminal frame was attempted.
    Disconnected,
}

impl Termination {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Summary of one relay invocation.
#[derive(Debug)]
pub struct RelayOutcome {
    pub state: RelayState,
    pub termination: Termination,
    pub deltas_forwarded: usize,
    pub malformed_payloads: usize,
    /// Usage from the final upstream message, for cost estimation.
    pub usage: Option<UsageRecord>,
    /// Model name reported by upstream.
    pub model: Option<String>,
    /// Stop reason of the last choice that carried one.
    pub finish_reason: Option<String>,
}

/// Relays `request` from `upstream` into `sink`.
///
/// Writes zero or more delta frames followed by exactly one terminal frame,
/// unless the client disconnects first, in which case no terminal frame is
/// written and the upstream body is dropped immediately.
pub async fn relay<U, S>(upstream: &U, request: &UpstreamRequest, sink: &mut S) -> RelayOutcome
where
    U: Upstream + ?Sized,
    S: EventSink + ?Sized,
{
    let mut relay = StreamRelay::new(sink);
    let termination = relay.drive(upstream, request).await;
    relay.terminate(termination).await
}

struct StreamRelay<'a, S: ?Sized> {
    sink: &'a mut S,
    state: RelayState,
    deltas_forwarded: usize,
    malformed_payloads: usize,
    usage: Option<UsageRecord>,
    model: Option<String>,
    finish_reason: Option<String>,
}

impl<'a, S> StreamRelay<'a, S>
where
    S: EventSink + ?Sized,
{
    fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            state: RelayState::Open,
            deltas_forwarded: 0,
            malformed_payloads: 0,
            usage: None,
            model: None,
            finish_reason: None,
        }
    }

    fn transition(&mut self, next: RelayState) {
        debug!(from = ?self.state, to = ?next, "Relay state change");
        self.state = next;
    }

    async fn drive<U>(&mut self, upstream: &U, request: &UpstreamRequest) -> Termination
    where
        U: Upstream + ?Sized,
    {
        if self.sink.announce(&EVENT_STREAM_HEADERS).await.is_err() {
            return Termination::Disconnected;
        }

        let opened = tokio::select! {
            biased;
            () = self.sink.disconnected() => {
                info!("Client disconnected before upstream connection opened");
                return Termination::Disconnected;
            }
            opened = upstream.open(request) => opened,
        };

        let byte_stream = match opened {
            Ok(UpstreamResponse::Streaming(byte_stream)) => byte_stream,
            Ok(UpstreamResponse::Rejected { status, body }) => {
                warn!(status, "Upstream rejected streaming request");
                return Termination::Failed(RelayError::UpstreamStatus { status, body });
            }
            Err(e) => return Termination::Failed(e),
        };

        self.transition(RelayState::Streaming);
        let mut payloads = PayloadStream::new(byte_stream);

        // Dropping `payloads` on return releases the upstream connection.
        loop {
            let next = tokio::select! {
                biased;
                () = self.sink.disconnected() => {
                    info!(chunks = payloads.chunks_read(), "Client disconnected; abandoning upstream");
                    return Termination::Disconnected;
                }
                next = payloads.next_payload() => next,
            };

            match next {
                Ok(Some(payload)) => {
                    if self.forward(&payload).await.is_err() {
                        info!(chunks = payloads.chunks_read(), "Client write failed; abandoning upstream");
                        return Termination::Disconnected;
                    }
                }
                Ok(None) => return Termination::Completed,
                Err(e) => return Termination::Failed(e),
            }
        }
    }

    /// Decodes one payload and writes its delta, if any.
    ///
    /// Only a failed write is an error; undecodable payloads are dropped.
    async fn forward(&mut self, payload: &str) -> Result<(), RelayError> {
        let chunk = match serde_json::from_str::<ChatCompletionChunk>(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.malformed_payloads += 1;
                warn!(error = %RelayError::from(e), len = payload.len(), "Dropping malformed payload");
                return Ok(());
            }
        };

        if chunk.model.is_some() {
            self.model.clone_from(&chunk.model);
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if let Some(reason) = chunk.finish_reason() {
            debug!(finish_reason = reason, "Upstream choice finished");
            self.finish_reason = Some(reason.to_string());
        }

        let Some(text) = chunk.delta_text() else {
            return Ok(());
        };
        self.sink.write(frames::delta_frame(text)).await?;
        self.deltas_forwarded += 1;
        Ok(())
    }

    async fn terminate(mut self, termination: Termination) -> RelayOutcome {
        self.transition(RelayState::Terminating);

        let terminal_frame = match &termination {
            Termination::Completed => Some(frames::DONE_FRAME.to_string()),
            Termination::Failed(e) => {
                if e.is_upstream_failure() {
                    warn!(error = %e, "Relay ending with upstream failure");
                } else {
                    error!(error = %e, "Relay ending with internal failure");
                }
                Some(e.to_error_frame())
            }
            Termination::Disconnected => None,
        };

        if let Some(frame) = terminal_frame
            && self.sink.write(frame).await.is_err()
        {
            debug!("Client gone before terminal frame");
        }

        self.sink.close().await;
        self.transition(RelayState::Closed);

        info!(
            outcome = termination.label(),
            deltas = self.deltas_forwarded,
            malformed = self.malformed_payloads,
            finish_reason = self.finish_reason.as_deref().unwrap_or("none"),
            "Relay finished"
        );

        RelayOutcome {
            state: self.state,
            termination,
            deltas_forwarded: self.deltas_forwarded,
            malformed_payloads: self.malformed_payloads,
            usage: self.usage,
            model: self.model,
            finish_reason: self.finish_reason,
        }
    }
}
