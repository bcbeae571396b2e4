//! streamrelay - relays a language-model token stream to event-stream clients.
//!
//! The upstream provider streams `data:`-prefixed JSON records over chunked
//! HTTP. This crate reassembles those records regardless of how the transport
//! split them, extracts each text delta and re-frames it for downstream
//! clients as `data: {"delta": ...}` events, ending with exactly one
//! `event: done` or `event: error` frame.
//!
//! # Architecture
//!
//! - `ai::sse`: two-stage frame reassembler (line splitter, record extractor)
//! - `ai::client`: upstream connection handle and lazy payload stream
//! - `relay`: relay state machine and downstream sinks
//! - `ai::cost`: cost estimation from reported usage
//! - `api`: axum router exposing `POST /api/ai/stream`
//!
//! # Example
//!
//! ```no_run
//! use streamrelay::api::{AppState, router};
//! use streamrelay::core::config::AppConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     streamrelay::setup_logging();
//!
//!     let config = AppConfig::from_env()?;
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//!     let state = AppState::from_config(config)?;
//!
//!     axum::serve(listener, router(state)).await?;
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod api;
pub mod core;
pub mod errors;
pub mod relay;

pub use errors::RelayError;

/// Configure structured JSON logging.
///
/// Verbosity comes from `RUST_LOG` and defaults to `info`. Calling this more
/// than once keeps the first subscriber.
///
/// # Example
///
/// ```
/// streamrelay::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
