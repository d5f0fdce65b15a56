//! Streaming ingestion for the agent response
//!
//! The endpoint answers with a chunked text body in a line-oriented,
//! numeric-prefixed protocol: each frame is `<digits>:<payload>`, where
//! text payloads are double-quoted and tool-invocation frames carry
//! JSON metadata that must never reach the user. Chunk boundaries are
//! arbitrary and align with neither character nor line boundaries, so
//! decoding carries partial bytes and partial lines across chunks.
//!
//! The parser reconstructs the full assistant message from scratch on
//! every update: the accumulator only grows, and the store receives the
//! entire accumulated text each time, never a delta.

use crate::error::{NimbusError, Result};
use crate::store::SessionStore;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Substrings that mark a frame payload as tool-invocation metadata
const TOOL_CALL_MARKERS: [&str; 3] = ["{\"toolCallId\"", "\"toolName\"", "\"args\""];

/// Incremental UTF-8 decoder
///
/// Buffers the trailing bytes of an incomplete multi-byte character
/// until the next chunk completes it. Invalid sequences in the middle
/// of the stream decode to the replacement character instead of
/// aborting.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    /// Creates a decoder with no carried bytes
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, carrying any trailing partial character
    ///
    /// # Examples
    ///
    /// ```
    /// use nimbus::agent::Utf8StreamDecoder;
    ///
    /// let mut decoder = Utf8StreamDecoder::new();
    /// let bytes = "héllo".as_bytes();
    /// // Split in the middle of the two-byte 'é'.
    /// let first = decoder.feed(&bytes[..2]);
    /// let second = decoder.feed(&bytes[2..]);
    /// assert_eq!(format!("{}{}", first, second), "héllo");
    /// ```
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut decoded = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_len = e.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[..valid_len]));
                    match e.error_len() {
                        // Incomplete trailing sequence: carry it forward.
                        None => {
                            self.pending.drain(..valid_len);
                            break;
                        }
                        // Invalid bytes mid-stream: substitute and move on.
                        Some(bad_len) => {
                            decoded.push('\u{FFFD}');
                            self.pending.drain(..valid_len + bad_len);
                        }
                    }
                }
            }
        }

        decoded
    }

    /// Flush any carried bytes at end of stream
    ///
    /// A dangling partial character decodes lossily.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Parser for the numeric-prefixed line protocol
///
/// Owns the incremental decoder, the partial-line carry buffer, and the
/// running accumulator that holds the full assistant message so far.
#[derive(Debug, Default)]
pub struct FrameParser {
    decoder: Utf8StreamDecoder,
    line_buffer: String,
    content: String,
}

impl FrameParser {
    /// Creates an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk of raw bytes
    ///
    /// Returns true when the accumulator grew, i.e. the chunk carried
    /// at least one displayable payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use nimbus::agent::FrameParser;
    ///
    /// let mut parser = FrameParser::new();
    /// parser.feed_chunk(b"0:\"Hello \"\n1:{\"toolCallId\":\"x\"}\n2:\"world\\n!\"\n");
    /// assert_eq!(parser.content(), "Hello world !");
    /// ```
    pub fn feed_chunk(&mut self, chunk: &[u8]) -> bool {
        let text = self.decoder.feed(chunk);
        self.feed_text(&text)
    }

    /// Flush carried bytes and the final unterminated line
    ///
    /// Returns true when the flush added displayable content.
    pub fn finish(&mut self) -> bool {
        let tail = self.decoder.finish();
        let mut changed = self.feed_text(&tail);
        let last_line = std::mem::take(&mut self.line_buffer);
        changed |= self.process_line(&last_line);
        changed
    }

    /// The full assistant message accumulated so far
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Consume the parser, yielding the accumulated message
    pub fn into_content(self) -> String {
        self.content
    }

    fn feed_text(&mut self, text: &str) -> bool {
        self.line_buffer.push_str(text);
        let mut changed = false;
        while let Some(newline) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=newline).collect();
            changed |= self.process_line(&line);
        }
        changed
    }

    /// Handle one candidate line; returns true when content was appended
    fn process_line(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        // Protocol-relevant lines carry a numeric frame prefix.
        let Some(colon) = line.find(':') else {
            return false;
        };
        let (prefix, rest) = line.split_at(colon);
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        let payload = unquote(&rest[1..]);
        if payload.is_empty() {
            return false;
        }

        if TOOL_CALL_MARKERS.iter().any(|m| payload.contains(m)) {
            tracing::trace!("dropping tool-call frame");
            return false;
        }

        self.content.push_str(&payload.replace("\\n", " "));
        true
    }
}

/// Strip one leading and one trailing double quote, if present
fn unquote(payload: &str) -> &str {
    let payload = payload.strip_prefix('"').unwrap_or(payload);
    payload.strip_suffix('"').unwrap_or(payload)
}

/// How an ingestion run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The endpoint closed the stream normally
    Complete,
    /// The caller's cancellation token fired mid-stream
    Cancelled,
}

/// Result of a finished ingestion run
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// The full assistant message accumulated (possibly partial when
    /// cancelled)
    pub content: String,
    /// How the run ended
    pub end: StreamEnd,
}

/// Drive a response body through the parser into the store
///
/// The response stream is scoped to this call, so it is released on
/// every exit path: normal completion, error, or cancellation.
pub async fn ingest_response(
    response: reqwest::Response,
    store: &SessionStore,
    cancel: &CancellationToken,
) -> Result<StreamOutcome> {
    ingest_byte_stream(response.bytes_stream(), store, cancel).await
}

/// Drive a raw byte stream through the parser into the store
///
/// Reads chunks until the stream completes, errors, or `cancel` fires;
/// the cancellation token is checked at every suspension point. After
/// each chunk that changed the accumulator, the store's last message is
/// overwritten with the full accumulated text. On error the partial
/// content already written to the store stays there; the caller
/// surfaces the classified error alongside it.
pub async fn ingest_byte_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    store: &SessionStore,
    cancel: &CancellationToken,
) -> Result<StreamOutcome> {
    let mut parser = FrameParser::new();
    tokio::pin!(byte_stream);

    let end = loop {
        tokio::select! {
            // Cancellation wins over a ready chunk at every suspension
            // point.
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("response stream cancelled");
                break StreamEnd::Cancelled;
            }
            next = byte_stream.next() => match next {
                Some(Ok(chunk)) => {
                    if parser.feed_chunk(&chunk) {
                        store.update_last_message(parser.content());
                    }
                }
                Some(Err(e)) => {
                    // Partial content stays in the store.
                    return Err(
                        NimbusError::Network(format!("stream read failed: {}", e)).into(),
                    );
                }
                None => break StreamEnd::Complete,
            }
        }
    };

    if end == StreamEnd::Complete && parser.finish() {
        store.update_last_message(parser.content());
    }

    Ok(StreamOutcome {
        content: parser.into_content(),
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChatMessage;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.feed(b"plain text"), "plain text");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_carries_split_multibyte_char() {
        let mut decoder = Utf8StreamDecoder::new();
        let bytes = "☀️ sunny".as_bytes();
        let split = 2; // inside the three-byte sun character
        let first = decoder.feed(&bytes[..split]);
        let second = decoder.feed(&bytes[split..]);
        assert_eq!(format!("{}{}", first, second), "☀️ sunny");
    }

    #[test]
    fn test_decoder_handles_byte_at_a_time() {
        let mut decoder = Utf8StreamDecoder::new();
        let text = "Grüße ☀";
        let mut out = String::new();
        for byte in text.as_bytes() {
            out.push_str(&decoder.feed(&[*byte]));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8StreamDecoder::new();
        let out = decoder.feed(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_finish_flushes_dangling_partial() {
        let mut decoder = Utf8StreamDecoder::new();
        let bytes = "é".as_bytes();
        assert_eq!(decoder.feed(&bytes[..1]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn test_parser_accumulates_text_frames() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"0:\"Hello \"\n");
        parser.feed_chunk(b"2:\"world\"\n");
        assert_eq!(parser.content(), "Hello world");
    }

    #[test]
    fn test_parser_drops_tool_call_frames() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"0:\"Hello \"\n");
        parser.feed_chunk(b"1:{\"toolCallId\":\"call_1\",\"toolName\":\"weather\"}\n");
        parser.feed_chunk(b"2:\"world\\n!\"\n");
        assert_eq!(parser.content(), "Hello world !");
    }

    #[test]
    fn test_parser_drops_frames_with_tool_name_marker() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"5:{\"toolName\":\"getWeather\"}\n");
        parser.feed_chunk(b"5:{\"args\":{\"city\":\"Oslo\"}}\n");
        assert_eq!(parser.content(), "");
    }

    #[test]
    fn test_parser_replaces_newline_escapes_with_spaces() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"0:\"line one\\nline two\"\n");
        assert_eq!(parser.content(), "line one line two");
    }

    #[test]
    fn test_parser_ignores_lines_without_numeric_prefix() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"event: message\n");
        parser.feed_chunk(b"x1:\"nope\"\n");
        parser.feed_chunk(b":\"no prefix\"\n");
        parser.feed_chunk(b"\n\n");
        assert_eq!(parser.content(), "");
    }

    #[test]
    fn test_parser_keeps_payload_after_first_colon() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"0:\"time: 12:30\"\n");
        assert_eq!(parser.content(), "time: 12:30");
    }

    #[test]
    fn test_parser_strips_at_most_one_quote_pair() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"0:\"\"quoted\"\"\n");
        assert_eq!(parser.content(), "\"quoted\"");
    }

    #[test]
    fn test_parser_handles_frame_split_across_chunks() {
        let mut parser = FrameParser::new();
        assert!(!parser.feed_chunk(b"0:\"Hel"));
        assert!(parser.feed_chunk(b"lo\"\n"));
        assert_eq!(parser.content(), "Hello");
    }

    #[test]
    fn test_parser_handles_multibyte_split_inside_frame() {
        let frame = "0:\"überall\"\n".as_bytes();
        // Split inside the two-byte 'ü'.
        let split = 3;
        let mut parser = FrameParser::new();
        parser.feed_chunk(&frame[..split]);
        parser.feed_chunk(&frame[split..]);
        assert_eq!(parser.content(), "überall");
    }

    #[test]
    fn test_parser_finish_flushes_unterminated_line() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"0:\"no trailing newline\"");
        assert_eq!(parser.content(), "");
        assert!(parser.finish());
        assert_eq!(parser.content(), "no trailing newline");
    }

    #[test]
    fn test_parser_skips_empty_payload() {
        let mut parser = FrameParser::new();
        assert!(!parser.feed_chunk(b"0:\"\"\n"));
        assert!(!parser.feed_chunk(b"3:\n"));
        assert_eq!(parser.content(), "");
    }

    #[test]
    fn test_mixed_frame_sequence_reconstructs_message() {
        let mut parser = FrameParser::new();
        parser.feed_chunk(b"0:\"Hello \"\n1:{\"toolCallId\":\"x\"}\n2:\"world\\n!\"\n");
        assert_eq!(parser.content(), "Hello world !");
    }

    fn chunk_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl futures::Stream<Item = reqwest::Result<Bytes>> {
        futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
    }

    fn store_with_placeholder() -> SessionStore {
        let store = SessionStore::in_memory();
        store.create_session(None);
        store.add_message_to_current_session(ChatMessage::assistant_placeholder());
        store
    }

    #[tokio::test]
    async fn test_ingest_complete_writes_full_content() {
        let store = store_with_placeholder();
        let cancel = CancellationToken::new();

        let stream = chunk_stream(vec![b"0:\"Hello \"\n", b"2:\"world\"\n"]);
        let outcome = ingest_byte_stream(stream, &store, &cancel).await.unwrap();

        assert_eq!(outcome.end, StreamEnd::Complete);
        assert_eq!(outcome.content, "Hello world");
        assert_eq!(
            store.current_messages().last().unwrap().message,
            "Hello world"
        );
    }

    #[tokio::test]
    async fn test_ingest_updates_store_with_full_accumulator_each_chunk() {
        let store = store_with_placeholder();
        let cancel = CancellationToken::new();

        // Record every value the store receives.
        let observed = Arc::new(StdMutex::new(Vec::new()));
        let reader = store.clone();
        let sink = Arc::clone(&observed);
        let _sub = store.subscribe(move || {
            if let Some(last) = reader.current_messages().last() {
                sink.lock().unwrap().push(last.message.clone());
            }
        });

        let stream = chunk_stream(vec![b"0:\"one \"\n", b"0:\"two \"\n", b"0:\"three\"\n"]);
        ingest_byte_stream(stream, &store, &cancel).await.unwrap();

        let seen = observed.lock().unwrap().clone();
        assert_eq!(seen, vec!["one ", "one two ", "one two three"]);
    }

    #[tokio::test]
    async fn test_ingest_cancelled_before_read_keeps_placeholder() {
        // A pre-cancelled token stops the loop at the first suspension
        // point without consuming the body.
        let store = store_with_placeholder();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stream = chunk_stream(vec![b"0:\"late\"\n"]);
        let outcome = ingest_byte_stream(stream, &store, &cancel).await.unwrap();

        assert_eq!(outcome.end, StreamEnd::Cancelled);
        assert_eq!(store.current_messages().last().unwrap().message, "");
    }

    #[tokio::test]
    async fn test_ingest_cancelled_mid_stream_keeps_partial_content() {
        let store = store_with_placeholder();
        let cancel = CancellationToken::new();

        // Cancel from inside the first store notification, i.e. right
        // after the first chunk lands; the pending rest of the stream is
        // never consumed.
        let trigger = cancel.clone();
        let _sub = store.subscribe(move || trigger.cancel());

        let first = chunk_stream(vec![b"0:\"partial \"\n"]);
        let stream = first.chain(futures::stream::pending());
        let outcome = ingest_byte_stream(stream, &store, &cancel).await.unwrap();

        assert_eq!(outcome.end, StreamEnd::Cancelled);
        assert_eq!(outcome.content, "partial ");
        assert_eq!(
            store.current_messages().last().unwrap().message,
            "partial "
        );
    }
}
