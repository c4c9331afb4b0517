//! Incremental decoders turning upstream body chunks into text fragments.
//!
//! Both decoders buffer raw bytes, so a frame (and any multi-byte character
//! inside it) may be split across reads at any position. Frames that fail to
//! parse are logged and skipped; they never end the stream.

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::Fragment;

const PREVIEW_CHARS: usize = 120;

/// Stateful per-stream decoder. One instance serves exactly one upstream body.
pub trait StreamDecoder: Send {
    /// Feeds the next raw chunk and returns every fragment it completes.
    fn decode(&mut self, chunk: &[u8]) -> Vec<Fragment>;

    /// Called once after the upstream closed; flushes any trailing frame.
    fn finish(&mut self) -> Vec<Fragment>;
}

/// OpenAI-style server-sent events: `data: {json}\n` frames, `data: [DONE]` sentinel.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder for SseDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Fragment> {
        self.buffer.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(index) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=index).collect::<Vec<_>>();
            fragments.extend(decode_sse_line(&line));
        }
        fragments
    }

    fn finish(&mut self) -> Vec<Fragment> {
        let line = std::mem::take(&mut self.buffer);
        decode_sse_line(&line).into_iter().collect()
    }
}

fn decode_sse_line(line: &[u8]) -> Option<Fragment> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    let frame: Value = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(error) => {
            warn!(error = %error, frame = %preview(payload), "skipping malformed SSE frame");
            return None;
        }
    };

    if let Some(error) = frame.get("error") {
        warn!(error = %error, "upstream reported an error inside the event stream");
    }

    frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(ToOwned::to_owned)
}

/// Ollama-style newline-delimited JSON: one `{"response": ...}` object per line.
#[derive(Debug, Default)]
pub struct LineJsonDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder for LineJsonDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Fragment> {
        let mut carried = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(index) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=index).collect::<Vec<_>>();
            drain_with_carry(&line, carried, true, &mut fragments);
            carried = 0;
        }

        // Transports usually hand over one whole object per read, without the
        // trailing newline. Decode it now rather than waiting for the next read.
        let consumed = drain_with_carry(&self.buffer, carried, false, &mut fragments);
        self.buffer.drain(..consumed);
        fragments
    }

    fn finish(&mut self) -> Vec<Fragment> {
        let rest = std::mem::take(&mut self.buffer);
        if !rest.iter().all(u8::is_ascii_whitespace) {
            warn!(
                frame = %preview(&String::from_utf8_lossy(&rest)),
                "upstream closed inside a JSON object"
            );
        }
        Vec::new()
    }
}

/// Like [`drain_objects`], where the first `carried` bytes are a remainder
/// kept from an earlier read.
///
/// A remainder that turns out to be malformed is dropped on its own, and the
/// bytes that followed it are decoded by themselves.
fn drain_with_carry(
    bytes: &[u8],
    carried: usize,
    complete: bool,
    fragments: &mut Vec<Fragment>,
) -> usize {
    match drain_objects(bytes, complete, fragments) {
        Ok(consumed) => consumed,
        Err(0) if carried > 0 && carried < bytes.len() => {
            carried + drain_with_carry(&bytes[carried..], 0, complete, fragments)
        }
        Err(_) => bytes.len(),
    }
}

/// Parses every JSON object in `bytes`, returning how many bytes were consumed.
///
/// With `complete == false` an object cut off at the end is left unconsumed so
/// the caller can retry once more bytes arrive. A malformed object yields
/// `Err` with the offset it started at; everything from there is discarded.
fn drain_objects(
    bytes: &[u8],
    complete: bool,
    fragments: &mut Vec<Fragment>,
) -> Result<usize, usize> {
    let mut objects = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    let mut consumed = 0;

    loop {
        match objects.next() {
            Some(Ok(object)) => {
                consumed = objects.byte_offset();
                fragments.extend(response_fragment(&object));
            }
            Some(Err(error)) if error.is_eof() && !complete => return Ok(consumed),
            Some(Err(error)) => {
                warn!(
                    error = %error,
                    frame = %preview(&String::from_utf8_lossy(&bytes[consumed..])),
                    "skipping malformed JSON chunk"
                );
                return Err(consumed);
            }
            None => return Ok(bytes.len()),
        }
    }
}

fn response_fragment(object: &Value) -> Option<Fragment> {
    if let Some(error) = object.get("error") {
        warn!(error = %error, "upstream reported an error inside the stream");
    }
    if object.get("done").and_then(Value::as_bool) == Some(true) {
        debug!("upstream marked generation as done");
    }

    object
        .get("response")
        .and_then(Value::as_str)
        .filter(|response| !response.is_empty())
        .map(ToOwned::to_owned)
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSE_BODY: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Bon\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"jour \u{e9}t\u{e9} \u{1f600}\"}}]}\n\n",
        "data: {broken\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
    );

    fn decode_all<D: StreamDecoder>(mut decoder: D, chunks: &[&[u8]]) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        for chunk in chunks {
            fragments.extend(decoder.decode(chunk));
        }
        fragments.extend(decoder.finish());
        fragments
    }

    #[test]
    fn sse_decoding_is_independent_of_chunk_boundaries() {
        let whole = decode_all(SseDecoder::default(), &[SSE_BODY.as_bytes()]);
        let bytes = SSE_BODY
            .as_bytes()
            .iter()
            .map(std::slice::from_ref)
            .collect::<Vec<_>>();
        let byte_by_byte = decode_all(SseDecoder::default(), &bytes);

        assert_eq!(whole, vec!["Bon", "jour \u{e9}t\u{e9} \u{1f600}", "!"]);
        assert_eq!(whole, byte_by_byte);
    }

    #[test]
    fn sse_done_frame_neither_emits_nor_terminates() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.decode(b"data: [DONE]\n").is_empty());
        assert_eq!(
            decoder.decode(b"data: {\"choices\":[{\"delta\":{\"content\":\"more\"}}]}\n"),
            vec!["more"]
        );
    }

    #[test]
    fn sse_marker_split_across_reads_is_reassembled() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.decode(b"da").is_empty());
        assert!(decoder.decode(b"ta: {\"choices\":[{\"delta\":").is_empty());
        assert_eq!(
            decoder.decode(b"{\"content\":\"hi\"}}]}\r\n"),
            vec!["hi"]
        );
    }

    #[test]
    fn sse_ignores_non_data_lines_and_empty_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.decode(b"").is_empty());
        assert!(decoder.decode(b": keep-alive\nevent: message\nid: 7\n").is_empty());
    }

    #[test]
    fn sse_trailing_frame_without_newline_is_flushed() {
        let mut decoder = SseDecoder::default();
        assert!(decoder
            .decode(b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}")
            .is_empty());
        assert_eq!(decoder.finish(), vec!["end"]);
    }

    #[test]
    fn line_decoder_emits_one_fragment_per_response() {
        let mut decoder = LineJsonDecoder::default();
        assert_eq!(decoder.decode(br#"{"response":"x"}"#), vec!["x"]);
    }

    #[test]
    fn line_decoder_skips_invalid_json_and_keeps_going() {
        let mut decoder = LineJsonDecoder::default();
        assert!(decoder.decode(b"{not json}").is_empty());
        assert_eq!(decoder.decode(br#"{"response":"ok"}"#), vec!["ok"]);
    }

    #[test]
    fn unterminated_object_does_not_swallow_the_next_read() {
        let mut decoder = LineJsonDecoder::default();
        assert!(decoder.decode(br#"{"response":"a""#).is_empty());
        assert_eq!(decoder.decode(br#"{"response":"b"}"#), vec!["b"]);
        assert_eq!(decoder.decode(br#"{"response":"c"}"#), vec!["c"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn unterminated_object_before_a_newline_keeps_the_fresh_line() {
        let mut decoder = LineJsonDecoder::default();
        assert!(decoder.decode(br#"{"response":"a""#).is_empty());
        assert_eq!(
            decoder.decode(b"{\"response\":\"b\"}\n{\"response\":\"c\"}\n"),
            vec!["b", "c"]
        );
    }

    #[test]
    fn line_decoder_ignores_objects_without_response() {
        let mut decoder = LineJsonDecoder::default();
        assert!(decoder
            .decode(br#"{"model":"llama2","done":true}"#)
            .is_empty());
        assert!(decoder.decode(b"").is_empty());
    }

    #[test]
    fn line_decoder_filters_empty_responses() {
        let fragments = decode_all(
            LineJsonDecoder::default(),
            &[
                &br#"{"response":"He"}"#[..],
                &br#"{"response":"llo"}"#[..],
                &br#"{"response":""}"#[..],
            ],
        );
        assert_eq!(fragments, vec!["He", "llo"]);
    }

    #[test]
    fn line_decoder_handles_coalesced_and_split_objects() {
        let mut decoder = LineJsonDecoder::default();
        assert_eq!(
            decoder.decode(b"{\"response\":\"a\"}\n{\"response\":\"b\"}\n{\"resp"),
            vec!["a", "b"]
        );
        assert_eq!(decoder.decode(b"onse\":\"c\"}\n"), vec!["c"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn line_decoder_skips_bad_line_between_good_ones() {
        let fragments = decode_all(
            LineJsonDecoder::default(),
            &[&b"{\"response\":\"a\"}\n{oops\n{\"response\":\"b\"}\n"[..]],
        );
        assert_eq!(fragments, vec!["a", "b"]);
    }
}
