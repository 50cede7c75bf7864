//! Newline framing with a bounded per-connection buffer.
//!
//! Bytes are read straight into the framer's spare region, then `drain`
//! hands out every complete line. A buffer that fills up without a `\n` is
//! flushed as one line and the framer enters discard mode: everything up to
//! and including the next `\n` is dropped, then normal framing resumes.
//!
//! Because a flush only happens when exactly `capacity` unterminated bytes are
//! pending, the produced lines do not depend on how the stream was split into
//! reads.

use std::fmt;
use tracing::{debug, trace};

/// One unit of client input, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(String);

impl CommandLine {
    /// Decode raw line bytes. A terminated line loses its trailing `\n` and
    /// a `\r` right before it. Returns `None` for invalid UTF-8.
    fn decode(raw: &[u8], terminated: bool) -> Option<Self> {
        let mut bytes = raw;
        if terminated {
            bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
            bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Some(CommandLine(text.to_owned())),
            Err(e) => {
                debug!(error = %e, len = raw.len(), "Dropping line with invalid UTF-8");
                None
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommandLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Framing state for one connection.
pub struct LineFramer {
    buf: Box<[u8]>,
    /// Bytes currently held in `buf`.
    filled: usize,
    discard: bool,
}

impl LineFramer {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "framer capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
            discard: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    pub fn is_discarding(&self) -> bool {
        self.discard
    }

    /// Unused tail of the buffer, for reading into.
    ///
    /// Never empty after a `drain`, since a full buffer is always flushed.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Mark `n` bytes of the spare region as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.buf.len(), "commit past capacity");
        self.filled = (self.filled + n).min(self.buf.len());
    }

    /// Emit every complete line, then apply the overflow policy.
    pub fn drain<F>(&mut self, mut on_line: F)
    where
        F: FnMut(CommandLine),
    {
        let mut start = 0;

        if self.discard {
            match find_newline(&self.buf[..self.filled]) {
                Some(pos) => {
                    trace!(dropped = pos + 1, "Discard mode ended");
                    start = pos + 1;
                    self.discard = false;
                }
                None => {
                    trace!(dropped = self.filled, "Discarding unterminated input");
                    self.filled = 0;
                    return;
                }
            }
        }

        while let Some(pos) = find_newline(&self.buf[start..self.filled]) {
            let end = start + pos + 1;
            if let Some(line) = CommandLine::decode(&self.buf[start..end], true) {
                on_line(line);
            }
            start = end;
        }

        // Compact the unterminated remainder to the front
        if start > 0 {
            self.buf.copy_within(start..self.filled, 0);
            self.filled -= start;
        }

        if self.filled == self.buf.len() {
            debug!(len = self.filled, "Line buffer overflow, flushing and discarding");
            if let Some(line) = CommandLine::decode(&self.buf[..self.filled], false) {
                on_line(line);
            }
            self.filled = 0;
            self.discard = true;
        }
    }

    /// Copy `data` through the buffer, draining as it fills.
    #[cfg(test)]
    pub(crate) fn feed<F>(&mut self, mut data: &[u8], mut on_line: F)
    where
        F: FnMut(CommandLine),
    {
        while !data.is_empty() {
            let spare = self.spare_mut();
            let n = spare.len().min(data.len());
            spare[..n].copy_from_slice(&data[..n]);
            self.commit(n);
            data = &data[n..];
            self.drain(&mut on_line);
        }
    }
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}
