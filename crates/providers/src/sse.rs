//! Server-Sent Events decoding for LLM streaming responses.
//!
//! [`StreamProtocolParser`] turns the raw bytes of a `text/event-stream`
//! body into provider-agnostic text deltas. It handles:
//! - chunks split anywhere, including mid-line and mid-UTF-8 sequence
//! - OpenAI-style `choices[0].delta.content` payloads
//! - Anthropic-style `content_block_delta` / `text_delta` events
//! - the `[DONE]` end-of-stream marker
//!
//! Malformed lines are logged and skipped; they never fail the stream.
//! [`spawn_sse_pump`] drives a parser over a live response body and exposes
//! the result as a [`ChunkReceiver`].

use futures::{Stream, StreamExt};
use marginalia_core::error::ProviderError;
use marginalia_core::provider::{ChunkReceiver, StreamChunk};
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Buffered chunks between the pump task and its consumer.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// What the parser produced from one complete `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta to append to the answer.
    Text(String),
    /// The upstream signalled end of stream.
    Done,
}

/// Result of matching one JSON payload against the known wire shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkText {
    /// Assistant text to surface.
    Text(String),
    /// A recognised delta kind that is intentionally not surfaced
    /// (`thinking_delta`, `input_json_delta`, ...).
    Dropped(String),
    /// No known shape carried text.
    NoText,
}

type ShapeMatcher = fn(&Value) -> Option<ChunkText>;

/// Known payload shapes, tried in order; the first match wins.
const SHAPES: &[(&str, ShapeMatcher)] = &[
    ("openai_delta", openai_delta),
    ("anthropic_delta", anthropic_delta),
    ("full_message", full_message),
];

/// Extract surfaced text from a decoded SSE JSON payload.
pub fn extract_text(payload: &Value) -> ChunkText {
    SHAPES
        .iter()
        .find_map(|(shape, matcher)| {
            let matched = matcher(payload)?;
            trace!(shape, ?matched, "Matched payload shape");
            Some(matched)
        })
        .unwrap_or(ChunkText::NoText)
}

fn text_or_nothing(text: &str) -> ChunkText {
    if text.is_empty() {
        ChunkText::NoText
    } else {
        ChunkText::Text(text.to_string())
    }
}

/// `choices[0].delta.content`
fn openai_delta(payload: &Value) -> Option<ChunkText> {
    let content = payload.pointer("/choices/0/delta/content")?.as_str()?;
    Some(text_or_nothing(content))
}

/// `{"type": "content_block_delta", "delta": {"type": "text_delta", "text": ...}}`
fn anthropic_delta(payload: &Value) -> Option<ChunkText> {
    if payload["type"].as_str() != Some("content_block_delta") {
        return None;
    }
    let delta = &payload["delta"];
    match delta["type"].as_str().unwrap_or("") {
        "text_delta" => Some(text_or_nothing(delta["text"].as_str().unwrap_or(""))),
        other => Some(ChunkText::Dropped(other.to_string())),
    }
}

/// Non-delta `choices[0].message.content`, sent by some proxies mid-stream.
fn full_message(payload: &Value) -> Option<ChunkText> {
    let content = payload.pointer("/choices/0/message/content")?.as_str()?;
    Some(text_or_nothing(content))
}

/// Incremental SSE decoder with a carry-over buffer.
///
/// Feed it byte chunks in arrival order; each call returns the events for
/// every line completed so far. A trailing partial line stays buffered
/// until the rest of it arrives (or [`finish`](Self::finish) is called).
#[derive(Debug, Default)]
pub struct StreamProtocolParser {
    /// Decoded text not yet terminated by a newline
    buffer: String,
    /// Bytes of a UTF-8 sequence split across chunk boundaries
    incomplete_utf8: Vec<u8>,
    /// Set once `[DONE]` has been seen
    done: bool,
    /// Lines whose payload failed to parse
    skipped_lines: usize,
}

impl StreamProtocolParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the events of every completed line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let text = self.decode_utf8(chunk);
        self.buffer.push_str(&text);
        self.drain_complete_lines()
    }

    /// Feed already-decoded text.
    pub fn feed_str(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        self.drain_complete_lines()
    }

    /// Flush whatever is left once the body has ended.
    ///
    /// An unterminated final `data:` line is processed as if it had ended
    /// with a newline; dangling UTF-8 bytes are replaced.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if !self.incomplete_utf8.is_empty() {
            let tail = std::mem::take(&mut self.incomplete_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        if !rest.is_empty() {
            self.process_line(rest.trim_end_matches('\r'), &mut events);
        }
        events
    }

    /// Whether the `[DONE]` marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of malformed lines skipped so far.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Length of the carry-over buffer (text awaiting a newline).
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn drain_complete_lines(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.process_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        // Blank separators, comments, `event:`/`id:` fields carry no text.
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(payload) => match extract_text(&payload) {
                ChunkText::Text(text) => events.push(StreamEvent::Text(text)),
                ChunkText::Dropped(kind) => {
                    trace!(delta_type = %kind, "Dropping non-text delta");
                }
                ChunkText::NoText => {}
            },
            Err(e) => {
                self.skipped_lines += 1;
                trace!(error = %e, data = %data, "Ignoring unparseable SSE line");
            }
        }
    }

    /// Decode as much of `chunk` as forms complete UTF-8, keeping a split
    /// trailing sequence for the next call.
    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut combined = std::mem::take(&mut self.incomplete_utf8);
        combined.extend_from_slice(chunk);

        let mut text = String::with_capacity(combined.len());
        let mut rest: &[u8] = &combined;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.incomplete_utf8 = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }
}

/// Spawn a task that reads an SSE body and forwards normalised chunks.
///
/// The receiver yields text chunks in arrival order and always ends with a
/// `done` chunk, unless the body read fails, in which case the last item is
/// `Err(ProviderError::StreamInterrupted)`. Dropping the receiver stops the
/// read and drops the body, which closes the HTTP connection.
pub fn spawn_sse_pump<S, B, E>(provider_name: String, body: S) -> ChunkReceiver
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = std::pin::pin!(body);
        let mut parser = StreamProtocolParser::new();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!(provider = %provider_name, "Stream consumer dropped, aborting read");
                    return;
                }
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    for event in parser.feed(bytes.as_ref()) {
                        if !forward(&tx, event).await {
                            return;
                        }
                    }
                    if parser.is_done() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!(provider = %provider_name, error = %e, "Stream read failed");
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
                None => break,
            }
        }

        for event in parser.finish() {
            if !forward(&tx, event).await {
                return;
            }
        }

        if parser.skipped_lines() > 0 {
            debug!(
                provider = %provider_name,
                skipped = parser.skipped_lines(),
                "Stream finished with skipped lines"
            );
        }

        // Body closed without [DONE]
        if !parser.is_done() {
            let _ = tx.send(Ok(StreamChunk::finished())).await;
        }
    });

    rx
}

async fn forward(
    tx: &tokio::sync::mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
    event: StreamEvent,
) -> bool {
    let chunk = match event {
        StreamEvent::Text(text) => StreamChunk::text(text),
        StreamEvent::Done => StreamChunk::finished(),
    };
    tx.send(Ok(chunk)).await.is_ok()
}
