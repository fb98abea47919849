//! Filesystem-like access to the presets, samples and programs stored inside
//! MIDI instruments, reachable only through System Exclusive messages.
//!
//! # Architecture
//!
//! - `transport`: one open byte channel, raw send/receive, drain and a response cache
//! - `sysex`: `F0 … F7` framing, request/response exchanges with deadlines and cancellation
//! - `connector`: ordered dialect registry and device autodetection (`detect`)
//! - `backend`: the connected device, its identity, filesystem tables and dialect state
//! - `filesystem`: the `FsOperations` capability table and the generic helpers on top of it
//! - `job_control`: shared progress and cancellation token for long operations
//! - `devices`: concrete dialects
//!
//! A typical session:
//!
//! ```ignore
//! let backend = sysex_fs::detect("hw:1,0", None, None)?;
//! for item in sysex_fs::filesystem::list(&backend, "/preset")? {
//!     println!("{} {}", item.id, item.name);
//! }
//! let job = JobControl::new();
//! let preset = sysex_fs::filesystem::download(&backend, "/preset/3", &job)?;
//! ```

// Flag unused code early
#![warn(unused)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod backend;
pub mod config;
pub mod connector;
pub mod devices;
pub mod errors;
pub mod filesystem;
mod ignore_poison;
pub mod job_control;
pub mod sysex;
pub mod transport;
pub mod types;

pub use backend::Backend;
pub use connector::{Connector, detect, detect_with};
pub use errors::BackendError;
pub use filesystem::{FsOperation, FsOperations, Item, ItemIterator, ItemKind};
pub use job_control::{CancelToken, JobControl};
pub use sysex::SysexTransfer;
pub use transport::{MidiPort, Transport, list_devices};

/// Wire traces in tests, controlled by `RUST_LOG`.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}
