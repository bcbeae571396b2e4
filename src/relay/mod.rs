//! Stream relay: re-frames upstream deltas as a downstream event stream.

pub mod frames;
pub mod sink;
pub mod stream;

pub use sink::{ChannelSink, ChannelSinkReceiver, EventSink};
pub use stream::{RelayOutcome, RelayState, Termination, relay};
