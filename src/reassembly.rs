//! Accumulates notification fragments until a frame is complete.
//!
//! A notification carries at most one MTU worth of bytes, so a response is
//! usually spread over several notifications. The buffer does not look at the
//! length field; a frame counts as complete as soon as the most recently
//! appended byte is the end marker.

use crate::protocol::END_BYTE;

#[derive(Debug, Default, Clone)]
pub struct ReassemblyBuffer {
    buffer: Vec<u8>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.last() == Some(&END_BYTE)
    }

    /// Returns the accumulated bytes and leaves the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
