//! Incremental newline framer for the tracker's serial console.
//!
//! The device interleaves protocol replies (`g{...}`, `s1`) with ordinary debug
//! output, all newline terminated. Reads arrive in arbitrary chunks; the framer
//! buffers them and hands out whole lines. A line that grows past
//! [`MAX_LINE_LEN`] without a terminator is dropped so a noisy or binary stream
//! cannot grow the buffer without bound.
use bytes::{Buf, BytesMut};
use log::warn;

/// Upper bound for a single line (a full settings JSON is a few KiB).
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub struct LineFramer {
    buf: BytesMut,
    max_line: usize,
    /// Set after an overflow; bytes are discarded until the next newline.
    skipping: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_LEN)
    }

    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_line,
            skipping: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non-empty line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > self.max_line {
                    warn!(
                        "Serial line exceeded {} bytes without terminator; discarding",
                        self.max_line
                    );
                    self.buf.clear();
                    self.skipping = true;
                }
                return None;
            };
            let raw = self.buf.split_to(pos);
            self.buf.advance(1);
            if std::mem::take(&mut self.skipping) {
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            return Some(line.to_string());
        }
    }

    /// Bytes buffered but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.skipping = false;
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_chunks_and_strips_crlf() {
        let mut f = LineFramer::new();
        f.push(b"g{\"a\":");
        assert_eq!(f.next_line(), None);
        f.push(b"1}\r\ns1\n\nboot");
        assert_eq!(f.next_line().as_deref(), Some("g{\"a\":1}"));
        assert_eq!(f.next_line().as_deref(), Some("s1"));
        assert_eq!(f.next_line(), None);
        assert_eq!(f.pending(), 4);
    }

    #[test]
    fn oversized_line_is_dropped_until_newline() {
        let mut f = LineFramer::with_limit(8);
        f.push(b"0123456789abc");
        assert_eq!(f.next_line(), None);
        assert_eq!(f.pending(), 0);
        f.push(b"tail\ns0\n");
        assert_eq!(f.next_line().as_deref(), Some("s0"));
    }
}
