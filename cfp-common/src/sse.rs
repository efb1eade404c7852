//! Server-Sent Events (SSE) utilities
//!
//! Server side: turn a topic receiver into an axum SSE response.
//! Client side: incremental parser for `text/event-stream` bodies.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// SSE event name for a delivered payload
pub const MESSAGE_EVENT: &str = "message";

/// SSE event name for a loss report; data is the number of dropped messages
pub const LAGGED_EVENT: &str = "lagged";

/// Keep-alive interval for long-lived streams
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Create an SSE response that forwards every message on a topic receiver
///
/// Lag is reported to the client as a `lagged` event instead of being
/// silently skipped, so consumers can account for lost messages.
pub fn topic_sse_stream(
    topic: String,
    rx: broadcast::Receiver<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(rx).map(move |result| {
        let event = match result {
            Ok(payload) => Event::default()
                .event(MESSAGE_EVENT)
                .data(normalize_line_endings(payload)),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!(topic = %topic, dropped = n, "SSE subscriber lagged");
                Event::default().event(LAGGED_EVENT).data(n.to_string())
            }
        };
        Ok(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

/// Map `\r\n` and bare `\r` to `\n`; the SSE encoder rejects carriage returns
fn normalize_line_endings(payload: String) -> String {
    if payload.contains('\r') {
        payload.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        payload
    }
}

/// One parsed SSE event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Longest SSE line accepted by `SseReader` before it gives up
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Incremental `text/event-stream` parser
///
/// Feed raw body chunks with `push`, then drain complete events with
/// `next_event`. Chunks may split lines and even UTF-8 sequences anywhere.
/// A line longer than the cap marks the reader overflowed; it then ignores
/// further input and yields nothing.
#[derive(Debug)]
pub struct SseReader {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a line feed
    scanned: usize,
    max_line: usize,
    overflowed: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Default for SseReader {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl SseReader {
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line: max_line.max(1),
            overflowed: false,
            event: None,
            data: Vec::new(),
            id: None,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if !self.overflowed {
            self.buffer.extend_from_slice(chunk);
        }
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn next_event(&mut self) -> Option<SseMessage> {
        if self.overflowed {
            return None;
        }
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_line {
                    warn!(buffered = self.buffer.len(), "SSE line exceeds limit");
                    self.overflowed = true;
                    self.buffer = Vec::new();
                    self.scanned = 0;
                }
                return None;
            };
            let newline_pos = self.scanned + offset;
            self.scanned = 0;
            if newline_pos > self.max_line {
                warn!(length = newline_pos, "SSE line exceeds limit");
                self.overflowed = true;
                self.buffer = Vec::new();
                return None;
            }

            let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            line.pop();
            if let Some(b'\r') = line.last() {
                line.pop();
            }

            if line.is_empty() {
                if self.event.is_none() && self.data.is_empty() && self.id.is_none() {
                    continue;
                }
                let msg = SseMessage {
                    event: self.event.take(),
                    data: self.data.join("\n"),
                    id: self.id.take(),
                };
                self.data.clear();
                return Some(msg);
            }

            // Comment line (keep-alive)
            if line.starts_with(b":") {
                debug!("SSE comment received");
                continue;
            }

            let (field, value) = match line.iter().position(|&b| b == b':') {
                Some(pos) => {
                    let value = &line[pos + 1..];
                    (&line[..pos], value.strip_prefix(b" ").unwrap_or(value))
                }
                None => (&line[..], &[][..]),
            };
            let value = String::from_utf8_lossy(value).into_owned();
            match field {
                b"event" => self.event = Some(value.trim().to_string()),
                b"data" => self.data.push(value),
                b"id" if !value.is_empty() => self.id = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_parses_single_event() {
        let mut reader = SseReader::default();
        reader.push(b"event: message\ndata: {\"a\":1}\n\n");
        let msg = reader.next_event().unwrap();
        assert_eq!(msg.event.as_deref(), Some("message"));
        assert_eq!(msg.data, "{\"a\":1}");
        assert!(reader.next_event().is_none());
    }

    #[test]
    fn test_reader_handles_split_chunks_and_crlf() {
        let mut reader = SseReader::default();
        reader.push(b"event: lag");
        assert!(reader.next_event().is_none());
        reader.push(b"ged\r\ndata: 3\r");
        assert!(reader.next_event().is_none());
        reader.push(b"\n\r\n");
        let msg = reader.next_event().unwrap();
        assert_eq!(msg.event.as_deref(), Some("lagged"));
        assert_eq!(msg.data, "3");
    }

    #[test]
    fn test_reader_skips_comments_and_joins_data_lines() {
        let mut reader = SseReader::default();
        reader.push(b": keep-alive\n\ndata: line1\ndata: line2\nid: 42\n\n");
        let msg = reader.next_event().unwrap();
        assert_eq!(msg.event, None);
        assert_eq!(msg.data, "line1\nline2");
        assert_eq!(msg.id.as_deref(), Some("42"));
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc".into()), "a\nb\nc");
        assert_eq!(normalize_line_endings("plain".into()), "plain");
    }

    #[test]
    fn test_reader_overflows_on_unterminated_line() {
        let mut reader = SseReader::with_max_line(16);
        reader.push(b"data: 0123456789");
        assert!(reader.next_event().is_none());
        assert!(!reader.is_overflowed());

        reader.push(b"abcdef");
        assert!(reader.next_event().is_none());
        assert!(reader.is_overflowed());

        // Nothing more is parsed once overflowed
        reader.push(b"\n\ndata: x\n\n");
        assert!(reader.next_event().is_none());
    }

    #[test]
    fn test_reader_lines_within_limit_still_parse() {
        let mut reader = SseReader::with_max_line(16);
        reader.push(b"data: short\n\n");
        assert_eq!(reader.next_event().unwrap().data, "short");
        assert!(!reader.is_overflowed());
    }

    #[test]
    fn test_reader_multiple_events_in_one_chunk() {
        let mut reader = SseReader::default();
        reader.push(b"data: a\n\ndata: b\n\n");
        assert_eq!(reader.next_event().unwrap().data, "a");
        assert_eq!(reader.next_event().unwrap().data, "b");
        assert!(reader.next_event().is_none());
    }
}
