//! Line assembly over an unreliable byte stream.
//!
//! Meters answer with delimiter-terminated messages (carriage return for the
//! Fluke family) but the link delivers arbitrary chunks: half a message, three
//! messages at once, or a burst of line noise. [`LineAssembler`] accumulates
//! bytes into a bounded buffer and hands out each completed [`Message`].
//!
//! The buffer never grows past its capacity. When it fills up without a
//! delimiter the contents are discarded, a warning is logged and assembly
//! starts over with the byte that did not fit.

use std::borrow::Cow;
use tracing::{trace, warn};

/// Receive buffer size used when nothing else is configured.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Smallest capacity accepted by [`LineAssembler::new`].
pub const MIN_BUFFER_CAPACITY: usize = 2;

/// One complete message, delimiter and trailing CR/LF removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8>,
}

impl Message {
    /// Raw message bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Message text, lossily decoded and trimmed.
    pub fn as_str(&self) -> Cow<'_, str> {
        match String::from_utf8_lossy(&self.bytes) {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
            Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-length message.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A single-byte message is an acknowledgement of the last command.
    pub fn is_ack(&self) -> bool {
        self.bytes.len() == 1
    }

    /// The acknowledgement byte, if this is an ACK.
    pub fn ack_byte(&self) -> Option<u8> {
        match self.bytes.as_slice() {
            [b] => Some(*b),
            _ => None,
        }
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

/// Bounded accumulator that frames delimiter-terminated messages.
#[derive(Debug)]
pub struct LineAssembler {
    buf: Vec<u8>,
    capacity: usize,
    delimiter: u8,
    /// Set after a delimiter so the LF of a CRLF pair is not taken as content.
    after_delimiter: bool,
    desync_count: u64,
}

impl LineAssembler {
    /// Creates an assembler holding at most `capacity` bytes of one message.
    pub fn new(capacity: usize, delimiter: u8) -> Self {
        let capacity = capacity.max(MIN_BUFFER_CAPACITY);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            delimiter,
            after_delimiter: false,
            desync_count: 0,
        }
    }

    /// Largest message the assembler can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered for the message in progress.
    pub fn fill(&self) -> usize {
        self.buf.len()
    }

    /// Room left before the next overflow.
    pub fn free(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Number of overflow resets since creation.
    pub fn desync_count(&self) -> u64 {
        self.desync_count
    }

    /// Drops any partial message.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.after_delimiter = false;
    }

    /// Feeds one byte, returning a message when `byte` completes one.
    ///
    /// Empty messages (a bare delimiter) are swallowed.
    pub fn feed(&mut self, byte: u8) -> Option<Message> {
        if byte == self.delimiter {
            self.after_delimiter = true;
            while matches!(self.buf.last(), Some(b'\r' | b'\n')) {
                self.buf.pop();
            }
            if self.buf.is_empty() {
                return None;
            }
            let bytes = std::mem::replace(&mut self.buf, Vec::with_capacity(self.capacity));
            trace!(len = bytes.len(), "assembled message");
            return Some(Message { bytes });
        }

        if byte == b'\n' && self.after_delimiter && self.buf.is_empty() {
            return None;
        }
        self.after_delimiter = false;

        if self.buf.len() >= self.capacity {
            self.desync_count += 1;
            warn!(
                capacity = self.capacity,
                desyncs = self.desync_count,
                "Receive buffer full without delimiter, discarding"
            );
            self.buf.clear();
        }
        self.buf.push(byte);
        None
    }

    /// Feeds a chunk, collecting every message it completes.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<Message> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, b'\r')
    }
}
