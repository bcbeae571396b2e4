use proptest::prelude::*;
use streamrelay::ai::{FrameReassembler, ParseResult};

/// A realistic upstream body: role frame, content deltas (some with
/// multi-byte text and escapes), a payload broken over lines, usage, `[DONE]`.
const UPSTREAM_BODY: &str = concat!(
    ": keep-alive\n\n",
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo, 世界 🌍\"}}]}\r\n\r\n",
    "data: {\"choices\":[{\"delta\":\n",
    "{\"content\":\" \\\"quoted\\\" {braces}\"}}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"total_tokens\":12}}\n\n",
    "data: [DONE]\n\n",
);

fn reassemble<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<ParseResult> {
    let mut reassembler = FrameReassembler::new();
    let mut results = Vec::new();
    for chunk in chunks {
        results.extend(reassembler.feed(chunk));
    }
    results.extend(reassembler.finish());
    results
}

fn split_at_points(bytes: &[u8], mut points: Vec<usize>) -> Vec<&[u8]> {
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for point in points {
        chunks.push(&bytes[start..point]);
        start = point;
    }
    chunks.push(&bytes[start..]);
    chunks
}

#[test]
fn test_unsplit_body_payloads() {
    let results = reassemble([UPSTREAM_BODY.as_bytes()]);

    assert_eq!(results.len(), 6);
    assert_eq!(results.last(), Some(&ParseResult::Done));
    assert_eq!(
        results[3],
        ParseResult::Payload(
            "{\"choices\":[{\"delta\":{\"content\":\" \\\"quoted\\\" {braces}\"}}]}".to_string()
        )
    );
}

#[test]
fn test_byte_at_a_time() {
    let whole = reassemble([UPSTREAM_BODY.as_bytes()]);
    let split = reassemble(UPSTREAM_BODY.as_bytes().chunks(1));

    assert_eq!(split, whole);
}

proptest! {
    #[test]
    fn reassembly_is_chunk_boundary_invariant(
        points in prop::collection::vec(0..=UPSTREAM_BODY.len(), 0..24)
    ) {
        let bytes = UPSTREAM_BODY.as_bytes();
        let whole = reassemble([bytes]);
        let split = reassemble(split_at_points(bytes, points));

        prop_assert_eq!(split, whole);
    }

    #[test]
    fn uniform_chunk_sizes_are_invariant(size in 1usize..64) {
        let bytes = UPSTREAM_BODY.as_bytes();
        prop_assert_eq!(reassemble(bytes.chunks(size)), reassemble([bytes]));
    }
}
