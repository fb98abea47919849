use crate::backend::Backend;
use crate::errors::BackendError;

use super::Connector;

/// Matches any device. It exposes no filesystem, only raw sysex send and receive.
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn name(&self) -> &'static str {
        "default"
    }

    fn handshake(&self, backend: &mut Backend) -> Result<(), BackendError> {
        let port_name = backend.transport().name();
        let name = if port_name.is_empty() {
            "MIDI device".to_string()
        } else {
            format!("MIDI device {port_name}")
        };
        backend.set_name(name);
        backend.set_filesystems(&[]);
        Ok(())
    }
}
