//! Message transport: one open byte channel to a MIDI device.
//!
//! The transport owns the port, the incoming framer and the response cache.
//! All of that bookkeeping sits behind one mutex that is only held for the
//! duration of a non-blocking read or a write, never while waiting for bytes.
//! A second guard, the exchange slot, keeps a single request in flight so
//! responses cannot be matched to the wrong request.

mod cache;
#[cfg(unix)]
mod rawmidi;
#[cfg(any(test, feature = "virtual-device"))]
pub mod virtual_port;

use log::{debug, info, warn};
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::TransportConfig;
use crate::errors::BackendError;
use crate::ignore_poison::IgnorePoison;
use crate::job_control::CancelToken;
use crate::sysex::framer::SysexFramer;
use crate::types::SystemDevice;
use cache::ResponseCache;

const READ_CHUNK_LEN: usize = 1024;

/// A duplex byte channel to one MIDI device.
pub trait MidiPort: Send {
    /// Human readable port name, for example "H9 Pedal MIDI 1".
    fn name(&self) -> &str;

    /// Reads the bytes currently available into `buf`, waiting at most `wait`
    /// for the first one. Returns `Ok(0)` when nothing arrived.
    fn read(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize>;

    /// Writes some of `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

/// Lists the MIDI ports available on this system.
///
/// Returns an empty vector if enumeration fails.
pub fn list_devices() -> Vec<SystemDevice> {
    #[cfg(unix)]
    {
        rawmidi::list_devices()
    }
    #[cfg(not(unix))]
    {
        Vec::new()
    }
}

struct IoState {
    port: Box<dyn MidiPort>,
    framer: SysexFramer,
    cache: ResponseCache,
}

/// An open connection to a byte-message channel.
pub struct Transport {
    id: String,
    name: String,
    config: TransportConfig,
    io: Mutex<IoState>,
    exchange: Mutex<()>,
}

impl Transport {
    /// Opens the system MIDI port named by `id` (for example "hw:1,0").
    pub fn open(id: &str) -> Result<Self, BackendError> {
        #[cfg(unix)]
        {
            let port = rawmidi::RawMidiPort::open(id)?;
            Ok(Self::new(id, Box::new(port), TransportConfig::from_env()))
        }
        #[cfg(not(unix))]
        {
            Err(BackendError::not_found(format!("No MIDI backend for {id} on this platform")))
        }
    }

    /// Wraps an already open port.
    pub fn new(id: &str, port: Box<dyn MidiPort>, config: TransportConfig) -> Self {
        let name = port.name().to_string();
        info!("Opened MIDI port {} ({})", id, name);
        Self {
            id: id.to_string(),
            name,
            config,
            io: Mutex::new(IoState {
                port,
                framer: SysexFramer::new(),
                cache: ResponseCache::default(),
            }),
            exchange: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name reported by the port.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends raw bytes. Returns the number of bytes written.
    pub fn send(&self, bytes: &[u8]) -> Result<usize, BackendError> {
        let mut io = self.io.lock_ignore_poison();
        let mut written = 0;
        while written < bytes.len() {
            match io.port.write(&bytes[written..]) {
                Ok(0) => {
                    return Err(BackendError::io(format!("{}: port accepted no data", self.id)));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Write to {} failed after {} bytes: {}", self.id, written, e);
                    return Err(BackendError::io(e.to_string()));
                }
            }
        }
        debug!("{} bytes sent to {}", written, self.id);
        Ok(written)
    }

    /// Receives whatever raw bytes arrive first, waiting up to `timeout`.
    pub fn receive(&self, timeout: Duration, cancel: Option<&CancelToken>) -> Result<Vec<u8>, BackendError> {
        let start = Instant::now();
        loop {
            if let Some(token) = cancel {
                token.check()?;
            }
            let bytes = self.read_available()?;
            if !bytes.is_empty() {
                return Ok(bytes);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(timed_out(timeout));
            }
            std::thread::sleep(self.config.poll_interval.min(timeout - elapsed));
        }
    }

    /// Discards buffered and in-flight input.
    ///
    /// Reads until the port stays quiet for the rest time, bounded by the dump
    /// timeout for devices that never stop talking.
    pub fn drain(&self) {
        self.io.lock_ignore_poison().framer.reset();

        let start = Instant::now();
        let mut quiet_since = Instant::now();
        let mut discarded = 0usize;
        while quiet_since.elapsed() < self.config.rest_time && start.elapsed() < self.config.dump_timeout {
            match self.read_available() {
                Ok(bytes) if !bytes.is_empty() => {
                    discarded += bytes.len();
                    quiet_since = Instant::now();
                }
                Ok(_) => std::thread::sleep(self.config.poll_interval.min(self.config.rest_time)),
                Err(e) => {
                    warn!("Error while draining {}: {}", self.id, e);
                    break;
                }
            }
        }
        if discarded > 0 {
            debug!("Drained {} stale bytes from {}", discarded, self.id);
        }
    }

    /// Starts memoizing responses by exact request bytes.
    pub fn enable_cache(&self) {
        debug!("Enabling response cache for {}", self.id);
        self.io.lock_ignore_poison().cache.enable();
    }

    /// Stops memoizing and forgets every cached response.
    pub fn disable_cache(&self) {
        debug!("Disabling response cache for {}", self.id);
        self.io.lock_ignore_poison().cache.disable();
    }

    /// Forgets cached responses, keeping the cache state.
    pub fn clear_cache(&self) {
        self.io.lock_ignore_poison().cache.clear();
    }

    /// Sends a program change on `channel` (0-15).
    pub fn program_change(&self, channel: u8, program: u8) -> Result<(), BackendError> {
        let msg = [0xc0 | (channel & 0x0f), program & 0x7f];
        debug!("Sending program change {} on channel {}", program, channel);
        self.send(&msg).map(|_| ())
    }

    /// Closes the port.
    pub fn close(self) {
        info!("Closing MIDI port {}", self.id);
        drop(self);
    }

    /// Reads everything immediately available without waiting.
    pub(crate) fn read_available(&self) -> Result<Vec<u8>, BackendError> {
        let mut io = self.io.lock_ignore_poison();
        read_now(io.port.as_mut())
    }

    /// Reads what is available and feeds it to the framer. Returns the number
    /// of raw bytes read.
    pub(crate) fn poll_framer(&self) -> Result<usize, BackendError> {
        let mut io = self.io.lock_ignore_poison();
        let bytes = read_now(io.port.as_mut())?;
        if !bytes.is_empty() {
            io.framer.push(&bytes);
        }
        Ok(bytes.len())
    }

    pub(crate) fn next_message(&self) -> Option<Vec<u8>> {
        self.io.lock_ignore_poison().framer.next_message()
    }

    pub(crate) fn cached_response(&self, request: &[u8]) -> Option<Vec<u8>> {
        self.io.lock_ignore_poison().cache.get(request)
    }

    pub(crate) fn cache_response(&self, request: &[u8], response: &[u8]) {
        self.io.lock_ignore_poison().cache.insert(request, response);
    }

    /// Claims the single request slot for a send-then-receive exchange.
    pub(crate) fn begin_exchange(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock_ignore_poison()
    }
}

fn read_now(port: &mut dyn MidiPort) -> Result<Vec<u8>, BackendError> {
    let mut out = Vec::new();
    let mut buf = [0u8; READ_CHUNK_LEN];
    loop {
        match port.read(&mut buf, Duration::ZERO) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(out),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(BackendError::io(e.to_string())),
        }
    }
}

pub(crate) fn timed_out(timeout: Duration) -> BackendError {
    BackendError::TimedOut {
        timeout_ms: timeout.as_millis() as u64,
    }
}
