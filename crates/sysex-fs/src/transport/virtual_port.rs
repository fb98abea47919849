//! In-memory MIDI port for tests and device simulation.
//!
//! Bytes written to the port are framed into sysex messages and handed to a
//! responder closure; whatever it returns is queued as input. A
//! [`VirtualHandle`] lets the test inspect what was written and inject stray
//! input at any time.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::MidiPort;
use crate::ignore_poison::IgnorePoison;
use crate::sysex::SysexFramer;

/// Maps one complete request message to the messages the device answers with.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Debug, Default)]
struct Shared {
    pending: VecDeque<u8>,
    written: Vec<u8>,
    fail_writes: bool,
    closed: bool,
}

/// Test-side view of a [`VirtualPort`]. Stays valid after the port is dropped.
#[derive(Debug, Clone)]
pub struct VirtualHandle {
    shared: Arc<Mutex<Shared>>,
}

impl VirtualHandle {
    /// Every byte written so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock_ignore_poison().written.clone()
    }

    /// Written bytes split into sysex messages.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        let mut framer = SysexFramer::new();
        framer.push(&self.written());
        std::iter::from_fn(|| framer.next_message()).collect()
    }

    pub fn clear_written(&self) {
        self.shared.lock_ignore_poison().written.clear();
    }

    /// Queues bytes as if the device had sent them unprompted.
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.lock_ignore_poison().pending.extend(bytes);
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock_ignore_poison().pending.len()
    }

    /// Makes every following write fail with a broken pipe.
    pub fn fail_writes(&self) {
        self.shared.lock_ignore_poison().fail_writes = true;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_ignore_poison().closed
    }
}

pub struct VirtualPort {
    name: String,
    shared: Arc<Mutex<Shared>>,
    framer: SysexFramer,
    responder: Responder,
}

impl VirtualPort {
    pub fn new(
        name: &str,
        responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> (Self, VirtualHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let port = Self {
            name: name.to_string(),
            shared: Arc::clone(&shared),
            framer: SysexFramer::new(),
            responder: Box::new(responder),
        };
        (port, VirtualHandle { shared })
    }

    /// A port that never answers.
    pub fn silent(name: &str) -> (Self, VirtualHandle) {
        Self::new(name, |_| Vec::new())
    }
}

impl MidiPort for VirtualPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], _wait: Duration) -> io::Result<usize> {
        let mut shared = self.shared.lock_ignore_poison();
        let n = buf.len().min(shared.pending.len());
        for (slot, byte) in buf.iter_mut().zip(shared.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        {
            let mut shared = self.shared.lock_ignore_poison();
            if shared.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "virtual port unplugged"));
            }
            shared.written.extend_from_slice(bytes);
        }

        self.framer.push(bytes);
        let mut replies = Vec::new();
        while let Some(request) = self.framer.next_message() {
            replies.extend((self.responder)(&request));
        }
        if !replies.is_empty() {
            let mut shared = self.shared.lock_ignore_poison();
            for reply in replies {
                shared.pending.extend(reply);
            }
        }
        Ok(bytes.len())
    }
}

impl Drop for VirtualPort {
    fn drop(&mut self) {
        self.shared.lock_ignore_poison().closed = true;
    }
}
