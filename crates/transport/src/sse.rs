/// Incremental parser for the chat stream's line-delimited `data: ` frames.
///
/// Format: newline-separated text lines; lines starting with `data: ` carry one
/// JSON event each. Everything else (blank separators, `event:` fields,
/// `:` comments) is ignored.
use futures::stream::{self, BoxStream, StreamExt};
use shared::ChatEvent;
use std::collections::VecDeque;

use crate::backend::ByteStream;
use crate::error::TransportError;

const DATA_PREFIX: &str = "data: ";

/// Decoded events in arrival order. Ends after the first transport error.
pub type EventStream = BoxStream<'static, Result<ChatEvent, TransportError>>;

/// Buffers raw bytes so that both lines and multi-byte characters may be split
/// across chunk boundaries.
#[derive(Debug, Default)]
pub struct EventParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    skipped: usize,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the HTTP response. Returns any complete events found.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChatEvent> {
        self.buffer.extend_from_slice(chunk);

        // Only bytes that arrived since the last call need searching.
        let mut ends = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            ends.push(self.scanned + offset);
            self.scanned += offset + 1;
        }
        let Some(&last) = ends.last() else {
            self.scanned = self.buffer.len();
            return Vec::new();
        };

        let complete: Vec<u8> = self.buffer.drain(..=last).collect();
        self.scanned = self.buffer.len();

        let mut events = Vec::new();
        let mut start = 0;
        for end in ends {
            if let Some(event) = self.decode_line(&complete[start..end]) {
                events.push(event);
            }
            start = end + 1;
        }
        events
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Vec<ChatEvent> {
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        self.decode_line(&line).into_iter().collect()
    }

    /// Number of `data: ` frames dropped because they failed to decode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<ChatEvent> {
        let text = String::from_utf8_lossy(raw);
        let line = text.strip_suffix('\r').unwrap_or(&text);
        let payload = line.strip_prefix(DATA_PREFIX)?;

        match ChatEvent::from_json(payload) {
            Ok(event) => {
                tracing::debug!(final_frame = event.is_final(), "decoded stream frame");
                Some(event)
            }
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, frame = payload, "skipping malformed stream frame");
                None
            }
        }
    }
}

struct DecodeState {
    bytes: ByteStream,
    parser: EventParser,
    pending: VecDeque<ChatEvent>,
    done: bool,
}

/// Adapt a byte stream into a lazy, forward-only stream of decoded events.
///
/// A transport error is yielded in place and terminates the sequence.
pub fn decode_event_stream(bytes: ByteStream) -> EventStream {
    let state = DecodeState {
        bytes,
        parser: EventParser::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.parser.feed(&chunk)),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    st.pending.extend(st.parser.finish());
                    let skipped = st.parser.skipped();
                    if skipped > 0 {
                        tracing::warn!(skipped, "stream ended; some frames were malformed");
                    }
                }
            }
        }
    })
    .boxed()
}
