//! HTTP surface

pub mod handler;
pub mod helpers;

pub use handler::{AppState, STREAM_PATH, router};
