//! Frame reassembler for `OpenAI`-style streaming responses.
//!
//! Upstream bytes arrive in arbitrary, provider-controlled chunks. Reassembly
//! runs as two stages:
//! - [`LineSplitter`] turns raw bytes into complete lines, keeping the
//!   unterminated tail in its pending buffer.
//! - [`FrameReassembler`] recognizes `data:` lines, joins payloads that were
//!   broken over several lines, and reports the `[DONE]` marker.
//!
//! Both stages are pure and synchronous; [`crate::ai::client::PayloadStream`]
//! drives them over an HTTP body.

use tracing::{debug, warn};

/// Prefix carried by every upstream record line.
pub const DATA_PREFIX: &str = "data:";

/// Out-of-band marker closing the upstream sequence.
pub const DONE_MARKER: &str = "[DONE]";

/// Upper bound on a payload spread over several lines.
pub const MAX_CARRY_LEN: usize = 1024 * 1024;

/// Result of feeding bytes to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete payload, ready to be decoded.
    Payload(String),
    /// End of stream signal (`[DONE]`).
    Done,
}

/// Splits a byte stream on `\n`, buffering the unterminated tail.
///
/// Splitting happens on bytes, so a multi-byte character cut in half by a
/// chunk boundary stays in the pending buffer until its line completes.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Appends a chunk and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // The pending tail never holds a newline, so only the new bytes are scanned.
        let Some(offset) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.pending.extend_from_slice(chunk);
            return Vec::new();
        };
        let last_newline = self.pending.len() + offset;
        self.pending.extend_from_slice(chunk);

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        complete
            .split(|&b| b == b'\n')
            // `split` yields an empty segment after the final newline
            .take(complete.iter().filter(|&&b| b == b'\n').count())
            .filter_map(decode_line)
            .collect()
    }

    /// Takes whatever is left in the pending buffer as a final line.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }

    /// Bytes received after the last newline.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(line) => Some(line.to_string()),
        Err(e) => {
            warn!(error = %e, len = raw.len(), "Dropping upstream line with invalid UTF-8");
            None
        }
    }
}

/// Stateful reassembler turning upstream bytes into payload strings.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    lines: LineSplitter,
    /// Payload opened on a `data:` line whose structure is not closed yet.
    carry: Option<(String, Nesting)>,
    done: bool,
}

impl FrameReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: LineSplitter::new(),
            carry: None,
            done: false,
        }
    }

    /// Feeds a chunk of upstream bytes and returns all complete results.
    ///
    /// Nothing is returned once `[DONE]` has been seen.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParseResult> {
        if self.done {
            return Vec::new();
        }

        let mut results = Vec::new();
        for line in self.lines.push(chunk) {
            if let Some(result) = self.extract(&line) {
                let is_done = result == ParseResult::Done;
                results.push(result);
                if is_done {
                    break;
                }
            }
        }
        results
    }

    /// Flushes the pending buffer at upstream end-of-stream.
    ///
    /// The unterminated tail is extracted like any other line. A payload still
    /// incomplete afterwards is dropped.
    pub fn finish(&mut self) -> Vec<ParseResult> {
        if self.done {
            return Vec::new();
        }

        let mut results = Vec::new();
        if let Some(line) = self.lines.flush()
            && let Some(result) = self.extract(&line)
        {
            results.push(result);
        }

        if let Some((carry, _)) = self.carry.take() {
            warn!(len = carry.len(), "Dropping incomplete payload at end of stream");
        }
        self.done = true;
        results
    }

    /// Whether the sequence has ended.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes buffered after the last complete line (for debugging/testing).
    #[must_use]
    pub fn remaining_buffer(&self) -> &[u8] {
        self.lines.pending()
    }

    /// Returns the carried-over partial payload, if any.
    #[must_use]
    pub fn carry(&self) -> Option<&str> {
        self.carry.as_ref().map(|(text, _)| text.as_str())
    }

    fn extract(&mut self, line: &str) -> Option<ParseResult> {
        if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            return self.extract_data(rest.trim());
        }

        if line.trim().is_empty() || is_sse_field(line) {
            return None;
        }

        let Some((mut carry, mut nesting)) = self.carry.take() else {
            debug!(line = %line, "Ignoring upstream line without data prefix");
            return None;
        };

        let line = line.trim();
        carry.push_str(line);
        nesting.scan(line);
        if nesting.is_closed() {
            Some(ParseResult::Payload(carry))
        } else if carry.len() > MAX_CARRY_LEN {
            warn!(len = carry.len(), "Dropping payload that exceeded the carry-over limit");
            None
        } else {
            self.carry = Some((carry, nesting));
            None
        }
    }

    fn extract_data(&mut self, payload: &str) -> Option<ParseResult> {
        if let Some((stale, _)) = self.carry.take() {
            warn!(len = stale.len(), "Discarding incomplete payload superseded by a new record");
        }

        if payload.is_empty() {
            return None;
        }

        if payload == DONE_MARKER {
            self.done = true;
            return Some(ParseResult::Done);
        }

        if opens_structure(payload) {
            let mut nesting = Nesting::default();
            nesting.scan(payload);
            if !nesting.is_closed() {
                self.carry = Some((payload.to_string(), nesting));
                return None;
            }
        }

        Some(ParseResult::Payload(payload.to_string()))
    }
}

fn is_sse_field(line: &str) -> bool {
    line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
}

fn opens_structure(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

/// Bracket nesting of a partial payload, tracked across the lines it spans.
#[derive(Debug, Default, Clone, Copy)]
struct Nesting {
    depth: i64,
    in_string: bool,
    escaped: bool,
    underflow: bool,
}

impl Nesting {
    fn scan(&mut self, text: &str) {
        for ch in text.chars() {
            if self.in_string {
                match ch {
                    _ if self.escaped => self.escaped = false,
                    '\\' => self.escaped = true,
                    '"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' | '[' => self.depth += 1,
                '}' | ']' => {
                    self.depth -= 1;
                    if self.depth < 0 {
                        self.underflow = true;
                    }
                }
                _ => {}
            }
        }
    }

    /// Whether every `{`/`[` outside string literals has been closed.
    const fn is_closed(&self) -> bool {
        self.underflow || (self.depth == 0 && !self.in_string)
    }
}
