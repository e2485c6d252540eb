//! Incremental decoder for the SSE-style line framing used by the batch
//! endpoint.
//!
//! The response body arrives as arbitrary byte chunks; a chunk may end in the
//! middle of a line, an event, or even a multi-byte UTF-8 sequence. The
//! decoder carries a single residual byte buffer across calls and only
//! converts bytes to text once a complete `\n`-terminated line is available,
//! so split characters reassemble naturally.
//!
//! Framing rules:
//! - `event: <name>` sets the pending event name (overwriting any uncommitted
//!   one).
//! - `data: <text>` appends the trimmed remainder to the pending payload;
//!   successive `data:` lines concatenate with no separator.
//! - A blank line flushes `(event, data)` when both are non-empty, and is a
//!   no-op otherwise.
//! - Anything else is ignored.
//!
//! The decoder itself never fails. Whether a flushed payload is valid JSON is
//! the caller's concern. An event left incomplete at end of input is simply
//! never emitted.

/// One complete framed event: the `event:` name and the accumulated `data:`
/// payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

/// Stateful line-framing decoder. One instance per response stream; state is
/// meaningless across unrelated streams.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    /// Residual bytes that do not yet form a complete line.
    buf: Vec<u8>,
    /// Pending event name (set, not yet flushed).
    event: String,
    /// Pending payload accumulator.
    data: String,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw bytes in arrival order.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, consuming buffered lines as needed.
    ///
    /// Returns `None` once no further complete frame can be produced from the
    /// bytes pushed so far; pushing more bytes may make it return `Some`
    /// again.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(&self.buf[..pos])
                .trim()
                .to_string();
            self.buf.drain(..=pos);

            if let Some(rest) = line.strip_prefix("event:") {
                self.event = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push_str(rest.trim());
            } else if line.is_empty() && !self.event.is_empty() && !self.data.is_empty() {
                return Some(Frame {
                    event: std::mem::take(&mut self.event),
                    data: std::mem::take(&mut self.data),
                });
            }
            // Blank line with nothing pending, or an unrecognized prefix:
            // ignored.
        }
        None
    }

    /// Drain every frame currently decodable from the buffered input.
    pub fn drain_frames(&mut self) -> impl Iterator<Item = Frame> + '_ {
        std::iter::from_fn(|| self.next_frame())
    }
}
