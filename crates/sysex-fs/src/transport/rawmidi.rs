//! ALSA raw MIDI character devices (`/dev/snd/midiC<card>D<device>`).
//!
//! Opened non-blocking and waited on with `poll(2)`, so reads never hold the
//! transport lock longer than the requested wait.

use log::{debug, warn};
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use super::MidiPort;
use crate::errors::BackendError;
use crate::types::SystemDevice;

const DEV_SND: &str = "/dev/snd";
const WRITE_WAIT: Duration = Duration::from_secs(1);

static HW_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^hw:(\d+),(\d+)(?:,(\d+))?$").unwrap());
static NODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^midiC(\d+)D(\d+)$").unwrap());

pub(crate) struct RawMidiPort {
    file: File,
    name: String,
}

impl RawMidiPort {
    /// Opens `hw:<card>,<device>[,<sub>]` or an absolute device path.
    pub fn open(id: &str) -> Result<Self, BackendError> {
        let path = device_path(id).ok_or_else(|| BackendError::invalid_path(id))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => BackendError::not_found(format!("No MIDI device at {}", path.display())),
                _ => BackendError::io(format!("{}: {}", path.display(), e)),
            })?;

        let name = card_of(&path)
            .and_then(card_name)
            .unwrap_or_else(|| id.to_string());
        debug!("Opened raw MIDI device {} as {}", path.display(), name);
        Ok(Self { file, name })
    }

    /// Waits until the descriptor is ready for `events`. Returns false on timeout.
    fn wait_ready(&self, events: libc::c_short, wait: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events,
            revents: 0,
        };
        let timeout_ms = wait.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: `pfd` is a valid pollfd for the lifetime of the call and the count is 1.
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "MIDI device disconnected"));
        }
        Ok(ready > 0)
    }
}

impl MidiPort for RawMidiPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize> {
        if !wait.is_zero() && !self.wait_ready(libc::POLLIN, wait)? {
            return Ok(0);
        }
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        match self.file.write(bytes) {
            Ok(n) => Ok(n),
            // Output queue full
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if !self.wait_ready(libc::POLLOUT, WRITE_WAIT)? {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "MIDI output queue stalled"));
                }
                self.file.write(bytes)
            }
            Err(e) => Err(e),
        }
    }
}

fn device_path(id: &str) -> Option<PathBuf> {
    if id.starts_with('/') {
        return Some(PathBuf::from(id));
    }
    let caps = HW_ID_RE.captures(id)?;
    Some(Path::new(DEV_SND).join(format!("midiC{}D{}", &caps[1], &caps[2])))
}

fn card_of(path: &Path) -> Option<u32> {
    let file_name = path.file_name()?.to_str()?;
    NODE_RE.captures(file_name)?[1].parse().ok()
}

/// Short card name from `/proc/asound/card<N>/id`.
fn card_name(card: u32) -> Option<String> {
    let id = fs::read_to_string(format!("/proc/asound/card{card}/id")).ok()?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Scans `/dev/snd` for raw MIDI nodes.
pub(crate) fn list_devices() -> Vec<SystemDevice> {
    let entries = match fs::read_dir(DEV_SND) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list MIDI devices in {}: {}", DEV_SND, e);
            return Vec::new();
        }
    };

    let mut devices: Vec<(u32, u32, SystemDevice)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let caps = NODE_RE.captures(&file_name)?;
            let card: u32 = caps[1].parse().ok()?;
            let device: u32 = caps[2].parse().ok()?;
            let id = format!("hw:{card},{device}");
            let name = card_name(card).map_or_else(|| id.clone(), |n| format!("{n} MIDI {}", device + 1));
            Some((card, device, SystemDevice { id, name }))
        })
        .collect();
    devices.sort_by_key(|(card, device, _)| (*card, *device));
    debug!("Found {} raw MIDI devices", devices.len());
    devices.into_iter().map(|(_, _, d)| d).collect()
}
