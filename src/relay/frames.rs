//! Downstream event-stream wire format.
//!
//! Frames are `data:`/`event:` blocks terminated by a blank line. Existing
//! clients split on `\n\n`, so the layout here must not change.

use serde::Serialize;

/// Response headers announcing a live event stream.
pub const EVENT_STREAM_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache, no-transform"),
    ("Connection", "keep-alive"),
];

/// Final frame after a successful relay.
pub const DONE_FRAME: &str = "event: done\ndata: [DONE]\n\n";

#[derive(Serialize)]
struct DeltaEvent<'a> {
    delta: &'a str,
}

// Field order is part of the wire format.
#[derive(Serialize)]
struct StatusErrorEvent<'a> {
    status: u16,
    body: &'a str,
}

#[derive(Serialize)]
struct MessageErrorEvent<'a> {
    error: &'a str,
}

fn encode<T: Serialize>(value: &T) -> String {
    // Serializing these borrowed-string structs cannot fail.
    serde_json::to_string(value).unwrap_or_default()
}

#[must_use]
pub fn delta_frame(text: &str) -> String {
    format!("data: {}\n\n", encode(&DeltaEvent { delta: text }))
}

#[must_use]
pub fn status_error_frame(status: u16, body: &str) -> String {
    format!(
        "event: error\ndata: {}\n\n",
        encode(&StatusErrorEvent { status, body })
    )
}

#[must_use]
pub fn message_error_frame(message: &str) -> String {
    format!(
        "event: error\ndata: {}\n\n",
        encode(&MessageErrorEvent { error: message })
    )
}
