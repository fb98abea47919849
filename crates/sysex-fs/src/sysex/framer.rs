//! Delimiter-based framing of the incoming byte stream into sysex messages.

use std::collections::VecDeque;

use super::{SYSEX_END, SYSEX_START};

/// Buffers input and emits a message whenever `F7` closes an `F0` block.
///
/// - Realtime bytes (`F8..=FF`) may legally interleave with a sysex message
///   and are dropped.
/// - Any other status byte inside a message aborts it.
/// - Bytes outside a message (running status, stray data) are ignored.
#[derive(Debug, Default)]
pub struct SysexFramer {
    buffer: Vec<u8>,
    in_message: bool,
    messages: VecDeque<Vec<u8>>,
    discarded: usize,
}

impl SysexFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests new bytes. Returns how many complete messages are now queued.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        for &b in bytes {
            if b >= 0xf8 {
                continue;
            }

            if b == SYSEX_START {
                if self.in_message {
                    self.discarded += self.buffer.len();
                }
                self.buffer.clear();
                self.buffer.push(b);
                self.in_message = true;
            } else if !self.in_message {
                self.discarded += 1;
            } else if b == SYSEX_END {
                self.buffer.push(b);
                self.messages.push_back(std::mem::take(&mut self.buffer));
                self.in_message = false;
            } else if b & 0x80 != 0 {
                self.discarded += self.buffer.len() + 1;
                self.buffer.clear();
                self.in_message = false;
            } else {
                self.buffer.push(b);
            }
        }
        self.messages.len()
    }

    /// Pops the oldest complete message.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        self.messages.pop_front()
    }

    /// True while a message has started but not yet been terminated.
    pub fn is_receiving(&self) -> bool {
        self.in_message
    }

    /// Number of bytes dropped since the last reset.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Forgets partial and queued messages.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.messages.clear();
        self.in_message = false;
        self.discarded = 0;
    }
}
