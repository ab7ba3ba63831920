//! Frame decoder for the line-oriented response stream
//!
//! Chunks arrive with arbitrary boundaries. The decoder keeps a single
//! carry-over buffer, cuts it at every line break, and classifies each
//! completed line:
//!
//! ```text
//! event: <name>     -> recognized, discarded
//! data: <payload>   -> payload yielded
//! anything else     -> dropped as noise
//! ```
//!
//! The decoder never fails; it only forwards or drops lines.

mod utf8;

pub use utf8::Utf8Accumulator;

/// Prefix of informational event-name lines
pub const EVENT_PREFIX: &str = "event:";

/// Prefix of payload-bearing lines
pub const DATA_PREFIX: &str = "data:";

/// Classification of a single completed line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// Blank after trimming
    Empty,
    /// `event:` line with its trimmed name
    Event(&'a str),
    /// `data:` line with its trimmed payload
    Data(&'a str),
    /// Neither marker; protocol noise
    Noise,
}

/// Classify one line of the stream. Prefixes are case-sensitive.
pub fn classify_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        Line::Empty
    } else if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
        Line::Event(name.trim())
    } else if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
        Line::Data(payload.trim())
    } else {
        Line::Noise
    }
}

/// Incremental decoder turning raw chunks into payload strings
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: String,
    utf8: Utf8Accumulator,
}

impl Decoder {
    /// Create a decoder with empty buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw byte chunk and return the payloads it completed
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(chunk);
        self.push_str(&text)
    }

    /// Push an already-decoded text chunk and return the payloads it completed
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        // Only the new text can hold a break; the carry-over never does.
        let carried = self.buffer.len();
        self.buffer.push_str(chunk);

        let Some(last_break) = chunk.rfind('\n').map(|i| carried + i) else {
            return Vec::new();
        };

        let remainder = self.buffer.split_off(last_break + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        complete
            .split('\n')
            .filter_map(|line| match classify_line(line) {
                Line::Data(payload) => Some(payload.to_string()),
                Line::Event(name) => {
                    tracing::trace!(event = name, "Skipping event-name line");
                    None
                }
                Line::Empty | Line::Noise => None,
            })
            .collect()
    }

    /// Number of bytes waiting for a line break
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.utf8.pending_len()
    }

    /// Signal end of stream.
    ///
    /// An unterminated trailing line is not a complete frame and is
    /// discarded. Returns the number of discarded bytes.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len() + self.utf8.reset();
        self.buffer.clear();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarding unterminated trailing line");
        }
        discarded
    }
}
