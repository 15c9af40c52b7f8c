//! Re-chunks a fragment stream into display lines.
//!
//! # State Machine
//! ```text
//! Idle ──push──▶ Streaming ──finish──▶ Draining ──▶ Done
//! ```
//!
//! # Flush Rules (checked after every push)
//! 1. A line break in the buffer flushes everything up to and including it
//! 2. Past `width` chars, flush through the last sentence end (`.`, `!`, `?`
//!    followed by whitespace) inside `width + tolerance` chars
//! 3. Past `width + tolerance` chars with no sentence end, break after the last
//!    whitespace inside the limit, else after the first whitespace beyond it
//! 4. A run with no whitespace is hard-split only past `max_line_chars`; no
//!    chunk is ever longer than that
//!
//! Every chunk is an exact slice of the input, delimiter included, so the
//! concatenation of all chunks equals the concatenation of all fragments.

use crate::config::StreamingConfig;

/// Lifecycle of one formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Draining,
    Done,
}

/// Line accumulator for one in-flight generation.
#[derive(Debug)]
pub struct StreamFormatter {
    state: StreamState,
    buffer: String,
    width: usize,
    limit: usize,
    max_line_chars: usize,
    emitted: usize,
}

impl StreamFormatter {
    pub fn new(config: &StreamingConfig) -> Self {
        let width = config.line_width.max(1);
        let limit = width + config.tolerance;
        Self {
            state: StreamState::Idle,
            buffer: String::new(),
            width,
            limit,
            max_line_chars: config.max_line_chars.max(limit),
            emitted: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Chunks emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Buffered text not yet flushed.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Append a fragment and return every chunk that is now ready.
    ///
    /// Fragments pushed after [`Self::finish`] are ignored.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        match self.state {
            StreamState::Draining | StreamState::Done => return Vec::new(),
            StreamState::Idle => self.state = StreamState::Streaming,
            StreamState::Streaming => {}
        }
        self.buffer.push_str(fragment);
        self.drain(false)
    }

    /// Flush everything that is left, regardless of size.
    pub fn finish(&mut self) -> Vec<String> {
        if self.state == StreamState::Done {
            return Vec::new();
        }
        self.state = StreamState::Draining;
        let mut chunks = self.drain(true);
        if !self.buffer.is_empty() {
            chunks.push(std::mem::take(&mut self.buffer));
            self.emitted += 1;
        }
        self.state = StreamState::Done;
        chunks
    }

    fn drain(&mut self, finishing: bool) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(end) = self.next_boundary(finishing) {
            let rest = self.buffer.split_off(end);
            chunks.push(std::mem::replace(&mut self.buffer, rest));
            self.emitted += 1;
        }
        chunks
    }

    /// Byte offset just past the next chunk, if one is ready.
    fn next_boundary(&self, finishing: bool) -> Option<usize> {
        let buf = self.buffer.as_str();
        if buf.is_empty() {
            return None;
        }

        if let Some(pos) = buf.find(['\n', '\r']) {
            let bytes = buf.as_bytes();
            if bytes[pos] == b'\r' {
                match bytes.get(pos + 1) {
                    Some(b'\n') => return Some(pos + 2),
                    Some(_) => return Some(pos + 1),
                    // A following LF may still arrive.
                    None if !finishing => return None,
                    None => return Some(pos + 1),
                }
            }
            return Some(pos + 1);
        }

        let len = buf.chars().count();
        if len <= self.width {
            return None;
        }

        if let Some(end) = last_sentence_end(buf, self.limit) {
            return Some(end);
        }
        if len <= self.limit {
            return None;
        }

        if let Some(end) = last_whitespace_end(buf, self.limit) {
            return Some(end);
        }
        match first_whitespace_end_after(buf, self.limit) {
            Some(end) if buf[..end].chars().count() <= self.max_line_chars => Some(end),
            _ if len > self.max_line_chars => Some(byte_offset(buf, self.max_line_chars)),
            _ => None,
        }
    }
}

/// End of the last `[.!?]` + whitespace pair within the first `limit` chars.
fn last_sentence_end(buf: &str, limit: usize) -> Option<usize> {
    let mut found = None;
    let mut prev_terminal = false;
    for (i, (offset, c)) in buf.char_indices().enumerate() {
        if i >= limit {
            break;
        }
        if prev_terminal && c.is_whitespace() && i > 1 {
            found = Some(offset + c.len_utf8());
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    found
}

/// End of the last whitespace within the first `limit` chars, ignoring a leading one.
fn last_whitespace_end(buf: &str, limit: usize) -> Option<usize> {
    buf.char_indices()
        .take(limit)
        .skip(1)
        .filter(|(_, c)| c.is_whitespace())
        .last()
        .map(|(offset, c)| offset + c.len_utf8())
}

fn first_whitespace_end_after(buf: &str, limit: usize) -> Option<usize> {
    buf.char_indices()
        .skip(limit)
        .find(|(_, c)| c.is_whitespace())
        .map(|(offset, c)| offset + c.len_utf8())
}

fn byte_offset(buf: &str, chars: usize) -> usize {
    buf.char_indices().nth(chars).map_or(buf.len(), |(offset, _)| offset)
}
