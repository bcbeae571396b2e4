//! HTTP entrypoint for the streaming relay.
//!
//! This module handles:
//! - Request validation (body shape, configured credentials)
//! - Spawning one relay task per request
//! - Turning the relay's channel sink into a streamed response body

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use super::helpers::err_response;
use crate::ai::client::{OpenAiClient, Upstream};
use crate::ai::cost::{ModelPricing, estimate_cost};
use crate::core::config::AppConfig;
use crate::core::models::{DEFAULT_MODEL, DEFAULT_TEMPERATURE, StreamRequest, UpstreamRequest};
use crate::errors::RelayError;
use crate::relay::{ChannelSink, RelayOutcome, relay};

pub const STREAM_PATH: &str = "/api/ai/stream";

/// Shared, read-only state for all requests.
pub struct AppState {
    pub config: AppConfig,
    /// `None` when no API key is configured; requests then fail with 500.
    pub upstream: Option<Arc<dyn Upstream>>,
    pub pricing: Arc<ModelPricing>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: Option<Arc<dyn Upstream>>) -> Self {
        let pricing = Arc::new(ModelPricing::from_override_json(
            config.model_pricing.as_deref(),
        ));
        Self {
            config,
            upstream,
            pricing,
        }
    }

    /// Builds state with the production upstream client.
    ///
    /// # Errors
    ///
    /// Returns an error if an API key is configured but the client cannot be
    /// built.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let upstream: Option<Arc<dyn Upstream>> = if config.openai_api_key.is_some() {
            Some(Arc::new(OpenAiClient::from_config(&config)?))
        } else {
            warn!("OPENAI_API_KEY not set; streaming requests will be refused");
            None
        };
        Ok(Self::new(config, upstream))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(STREAM_PATH, post(stream_handler))
        .with_state(Arc::new(state))
}

/// Streams a chat completion as an event stream.
///
/// Validation failures answer with a plain JSON error before any stream
/// starts. Once the relay has announced itself the response is always a 200
/// event stream; upstream failures arrive as `event: error` frames.
#[tracing::instrument(level = "info", skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn stream_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match parse_request(&state.config, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let Some(upstream) = state.upstream.as_ref().map(Arc::clone) else {
        error!("Streaming request refused: OpenAI key not configured");
        return err_response(StatusCode::INTERNAL_SERVER_ERROR, "OpenAI key not configured");
    };

    info!(model = %request.model, messages = request.messages.len(), "Starting relay");

    let (mut sink, receiver) = ChannelSink::channel(state.config.channel_capacity);
    let pricing = Arc::clone(&state.pricing);
    tokio::spawn(
        async move {
            let outcome = relay(upstream.as_ref(), &request, &mut sink).await;
            log_outcome(&pricing, &request.model, &outcome);
        }
        .instrument(tracing::Span::current()),
    );

    let Ok(headers) = receiver.head.await else {
        error!("Relay ended before announcing the event stream");
        return err_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to start event stream",
        );
    };

    let body_stream = ReceiverStream::new(receiver.body).map(Ok::<_, Infallible>);
    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build streaming response");
            err_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to build streaming response",
            )
        })
}

fn parse_request(config: &AppConfig, body: &[u8]) -> Result<UpstreamRequest, Response> {
    let bad_request = || err_response(StatusCode::BAD_REQUEST, "messages array required");

    let parsed: StreamRequest = serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Rejecting unparseable request body");
        bad_request()
    })?;

    let Some(messages) = parsed.messages.and_then(|m| m.as_array().cloned()) else {
        return Err(bad_request());
    };

    let model = parsed
        .model
        .or_else(|| config.openai_model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    Ok(UpstreamRequest {
        model,
        messages,
        temperature: parsed.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    })
}

fn log_outcome(pricing: &ModelPricing, requested_model: &str, outcome: &RelayOutcome) {
    let Some(usage) = outcome.usage.as_ref() else {
        debug!(outcome = outcome.termination.label(), "No usage reported by upstream");
        return;
    };

    let estimate = estimate_cost(pricing, Some(usage), requested_model);
    info!(
        model = %requested_model,
        upstream_model = outcome.model.as_deref().unwrap_or("unknown"),
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        completion_tokens = usage.completion_tokens.unwrap_or(0),
        tokens = estimate.breakdown.tokens,
        price_per_1k = estimate.breakdown.price_per_1k,
        cost = estimate.cost,
        "Relay usage"
    );
}
