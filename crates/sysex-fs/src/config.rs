//! Timing configuration for sysex exchanges.
//!
//! Devices differ wildly in how fast they answer, so every deadline lives here.
//! Priority: environment variables > explicit values > defaults.

use std::env;
use std::time::Duration;

/// Default deadline for a request/response exchange.
pub const SYSEX_TIMEOUT_MS: u64 = 5000;
/// Deadline for detection probes. When a request is not implemented by the
/// device, waiting the full sysex timeout is too much.
pub const SYSEX_TIMEOUT_GUESS_MS: u64 = 500;
/// Deadline for the first message of a dump. Some interfaces take more than
/// 3 seconds to start delivering packets.
pub const DUMP_TIMEOUT_MS: u64 = 5000;
/// Quiet window used to decide that stale input has been drained.
pub const REST_TIME_MS: u64 = 50;
/// How often a waiting receive polls the port and the cancel flag.
pub const POLL_INTERVAL_MS: u64 = 10;
/// Once a batch receive got its first message, the sender is considered done
/// after this much silence.
pub const BATCH_IDLE_TIMEOUT_MS: u64 = 1000;
/// Pause before re-issuing a bulk read that has side effects on the device.
pub const BULK_READ_SETTLE_MS: u64 = 1000;
/// How long to listen for an unexpected reply after a write that expects none.
pub const SILENCE_WINDOW_MS: u64 = 100;
/// Largest slice written to the port between cancellation checks.
pub const TX_CHUNK_LEN: usize = 512;

/// Separator between an item id and its display name in a path ("/12:Lead").
pub const ID_NAME_SEPARATOR: &str = ":";

/// Timings used by a transport and everything layered on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub poll_interval: Duration,
    pub sysex_timeout: Duration,
    pub guess_timeout: Duration,
    pub dump_timeout: Duration,
    pub batch_idle_timeout: Duration,
    pub rest_time: Duration,
    pub bulk_read_settle: Duration,
    pub silence_window: Duration,
}

impl TransportConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_env_and(Self::defaults())
    }

    /// Applies environment overrides on top of `base`.
    ///
    /// - `SYSEX_FS_POLL_INTERVAL_MS`
    /// - `SYSEX_FS_SYSEX_TIMEOUT_MS`
    /// - `SYSEX_FS_DUMP_TIMEOUT_MS`
    pub fn from_env_and(base: Self) -> Self {
        Self {
            poll_interval: env_millis("SYSEX_FS_POLL_INTERVAL_MS")
                .filter(|d| !d.is_zero())
                .unwrap_or(base.poll_interval),
            sysex_timeout: env_millis("SYSEX_FS_SYSEX_TIMEOUT_MS").unwrap_or(base.sysex_timeout),
            dump_timeout: env_millis("SYSEX_FS_DUMP_TIMEOUT_MS").unwrap_or(base.dump_timeout),
            ..base
        }
    }

    /// Built-in timings, ignoring the environment.
    pub fn defaults() -> Self {
        Self {
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            sysex_timeout: Duration::from_millis(SYSEX_TIMEOUT_MS),
            guess_timeout: Duration::from_millis(SYSEX_TIMEOUT_GUESS_MS),
            dump_timeout: Duration::from_millis(DUMP_TIMEOUT_MS),
            batch_idle_timeout: Duration::from_millis(BATCH_IDLE_TIMEOUT_MS),
            rest_time: Duration::from_millis(REST_TIME_MS),
            bulk_read_settle: Duration::from_millis(BULK_READ_SETTLE_MS),
            silence_window: Duration::from_millis(SILENCE_WINDOW_MS),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
