//! Upstream provider access: client, frame reassembly and cost estimation.

pub mod client;
pub mod cost;
pub mod sse;

// Re-export main types for convenience
pub use client::{ByteStream, OpenAiClient, PayloadStream, Upstream, UpstreamResponse};
pub use cost::{CostEstimate, ModelPricing, estimate_cost};
pub use sse::{FrameReassembler, LineSplitter, ParseResult};
