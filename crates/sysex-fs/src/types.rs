//! Device identity and storage types.
//!
//! These types are serialized to JSON for the presentation layers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::BackendError;

pub const COMPANY_LEN: usize = 3;
pub const FAMILY_LEN: usize = 2;
pub const MODEL_LEN: usize = 2;
pub const VERSION_LEN: usize = 4;

/// Identity codes from a universal Identity Reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiInfo {
    /// One-byte ids are stored in the first byte, the rest zeroed.
    pub company: [u8; COMPANY_LEN],
    pub family: [u8; FAMILY_LEN],
    pub model: [u8; MODEL_LEN],
    pub version: [u8; VERSION_LEN],
}

impl MidiInfo {
    /// Parses a universal Identity Reply (`F0 7E <dev> 06 02 <id> <fam×2> <model×2> <ver×4> F7`).
    ///
    /// The manufacturer id is 1 byte, or 3 bytes when the first one is `00`.
    pub fn from_identity_reply(msg: &[u8]) -> Result<Self, BackendError> {
        if msg.len() < 5 || msg[0] != 0xf0 || msg[1] != 0x7e || msg[3] != 0x06 {
            return Err(BackendError::bad_message("not an identity reply"));
        }
        if msg[4] != 0x02 {
            return Err(BackendError::bad_message(format!("illegal SUB-ID2 {:#04x}", msg[4])));
        }

        let mut info = MidiInfo::default();
        let company_len = if msg.get(5) == Some(&0) { COMPANY_LEN } else { 1 };
        let family_at = 5 + company_len;
        let model_at = family_at + FAMILY_LEN;
        let version_at = model_at + MODEL_LEN;
        if msg.len() < version_at + VERSION_LEN {
            return Err(BackendError::bad_message("illegal identity reply length"));
        }

        info.company[..company_len].copy_from_slice(&msg[5..family_at]);
        info.family.copy_from_slice(&msg[family_at..model_at]);
        info.model.copy_from_slice(&msg[model_at..version_at]);
        info.version.copy_from_slice(&msg[version_at..version_at + VERSION_LEN]);
        Ok(info)
    }

    /// Version as dotted decimal, for example "1.2.0.3".
    pub fn version_string(&self) -> String {
        let v = self.version;
        format!("{}.{}.{}.{}", v[0], v[1], v[2], v[3])
    }
}

impl fmt::Display for MidiInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.company;
        write!(
            f,
            "{:02x}-{:02x}-{:02x} {:02x}-{:02x} {:02x}-{:02x} {}",
            c[0],
            c[1],
            c[2],
            self.family[0],
            self.family[1],
            self.model[0],
            self.model[1],
            self.version_string()
        )
    }
}

/// Everything known about a connected device after the handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// For example, "Eventide H9 5.1.0.7" or "MIDI device hw:1,0".
    pub name: String,
    pub midi_info: MidiInfo,
    /// Bit set of filesystem ids the device supports.
    pub filesystems: u32,
    /// Bit set of storage ids with statistics available.
    pub storage: u32,
}

/// A MIDI port found on the system, before any handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemDevice {
    /// Identifier accepted by `Transport::open`, for example "hw:1,0".
    pub id: String,
    pub name: String,
}

/// Usage of one storage area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub name: String,
    /// In bytes.
    pub total_bytes: u64,
    /// In bytes.
    pub free_bytes: u64,
}

impl StorageStats {
    /// Used space in percent, 0 when the size is unknown.
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.free_bytes);
        used as f64 * 100.0 / self.total_bytes as f64
    }
}
