//! Dialect registry and device autodetection.
//!
//! Each dialect implements [`Connector`]. Detection tries them in priority
//! order against one open transport: dialects relying purely on the standard
//! identity inquiry come first and the universal fallback comes last.
//!
//! A handshake reports one of three outcomes:
//! - `Ok(())`: the device matches, detection stops.
//! - `Err(NotFound)`: not this dialect, continue with the next one.
//! - any other error: detection aborts and the error is returned as is.

mod default;

pub use default::DefaultConnector;

use log::{debug, info, warn};

use crate::backend::Backend;
use crate::devices::efactor::EfactorConnector;
use crate::errors::BackendError;
use crate::job_control::CancelToken;
use crate::sysex::SysexTransfer;
use crate::transport::Transport;
use crate::types::StorageStats;

/// A device dialect.
pub trait Connector: Sync {
    /// Short registry name, for example "efactor".
    fn name(&self) -> &'static str;

    /// Probes the device and, on a match, fills in the backend.
    fn handshake(&self, backend: &mut Backend) -> Result<(), BackendError>;

    fn storage_stats(&self, _backend: &Backend, _storage: u32) -> Result<StorageStats, BackendError> {
        Err(BackendError::not_supported("storage_stats"))
    }

    fn upgrade_os(&self, _backend: &Backend, _transfer: &mut SysexTransfer) -> Result<(), BackendError> {
        Err(BackendError::not_supported("upgrade_os"))
    }
}

/// Every known dialect, in detection order.
pub static CONNECTORS: &[&dyn Connector] = &[&EfactorConnector, &DefaultConnector];

/// Registry names, in detection order.
pub fn connector_names() -> Vec<&'static str> {
    CONNECTORS.iter().map(|c| c.name()).collect()
}

/// Opens the MIDI port `id` and identifies the device behind it.
///
/// With `name`, only the dialect of that name is tried. `cancel` is checked
/// before each handshake attempt.
pub fn detect(id: &str, name: Option<&str>, cancel: Option<&CancelToken>) -> Result<Backend, BackendError> {
    let transport = Transport::open(id)?;
    detect_with(transport, CONNECTORS, name, cancel)
}

/// Runs detection on an already open transport with an explicit dialect list.
///
/// The transport is closed unless a dialect matches.
pub fn detect_with(
    transport: Transport,
    connectors: &[&'static dyn Connector],
    name: Option<&str>,
    cancel: Option<&CancelToken>,
) -> Result<Backend, BackendError> {
    info!("Detecting device on {}", transport.id());
    // Leftovers from a previous session would be taken for replies
    transport.drain();
    let mut backend = Backend::new(transport);

    for &connector in connectors {
        if let Some(token) = cancel
            && !token.is_active()
        {
            debug!("Detection on {} cancelled", backend.transport().id());
            backend.into_transport().close();
            return Err(BackendError::Cancelled);
        }

        if let Some(wanted) = name
            && connector.name() != wanted
        {
            continue;
        }

        backend.reset();
        debug!("Testing {} connector on {}", connector.name(), backend.transport().id());
        match connector.handshake(&mut backend) {
            Ok(()) => {
                backend.bind(connector);
                info!("Using {} connector for {}", connector.name(), backend.name());
                return Ok(backend);
            }
            Err(e) if e.is_not_found() => {
                debug!("{} connector does not match: {}", connector.name(), e);
                backend.transport().drain();
            }
            Err(e) => {
                warn!("{} connector failed on {}: {}", connector.name(), backend.transport().id(), e);
                backend.into_transport().close();
                return Err(e);
            }
        }
    }

    let id = backend.transport().id().to_string();
    warn!("No device recognized on {}", id);
    backend.into_transport().close();
    Err(BackendError::not_found(format!("No device recognized on {id}")))
}
