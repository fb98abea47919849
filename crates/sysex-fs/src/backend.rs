//! The connected device.
//!
//! A `Backend` is produced by a successful handshake (see [`crate::detect`])
//! and owns the transport for its whole life. Everything a dialect learns
//! during the handshake lives here: the identity, the filesystem tables it
//! binds, and an opaque state value only that dialect knows how to read.

use log::{debug, info};
use std::any::Any;

use crate::connector::Connector;
use crate::errors::BackendError;
use crate::filesystem::FsOperations;
use crate::job_control::JobControl;
use crate::sysex::SysexTransfer;
use crate::transport::Transport;
use crate::types::{DeviceInfo, MidiInfo, StorageStats};

type DialectState = Box<dyn Any + Send + Sync>;

pub struct Backend {
    transport: Transport,
    connector: Option<&'static dyn Connector>,
    info: DeviceInfo,
    fs_ops: &'static [&'static dyn FsOperations],
    data: Option<DialectState>,
}

impl Backend {
    /// A backend that has not been through a handshake yet.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            connector: None,
            info: DeviceInfo::default(),
            fs_ops: &[],
            data: None,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The dialect that matched, once detection succeeded.
    pub fn connector(&self) -> Option<&'static dyn Connector> {
        self.connector
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Display name, for example "Eventide H9 5.1.0.7".
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn midi_info(&self) -> &MidiInfo {
        &self.info.midi_info
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.info.name = name.into();
    }

    pub fn set_midi_info(&mut self, midi_info: MidiInfo) {
        self.info.midi_info = midi_info;
    }

    /// Binds the filesystem tables the device exposes and records their ids.
    pub fn set_filesystems(&mut self, fs_ops: &'static [&'static dyn FsOperations]) {
        self.fs_ops = fs_ops;
        self.info.filesystems = fs_ops.iter().fold(0, |bits, ops| bits | ops.id());
    }

    /// Records the storage ids with statistics available.
    pub fn set_storage(&mut self, storage: u32) {
        self.info.storage = storage;
    }

    pub fn filesystems(&self) -> &'static [&'static dyn FsOperations] {
        self.fs_ops
    }

    pub fn fs_operations_by_id(&self, id: u32) -> Option<&'static dyn FsOperations> {
        self.fs_ops.iter().copied().find(|ops| ops.id() == id)
    }

    pub fn fs_operations_by_name(&self, name: &str) -> Option<&'static dyn FsOperations> {
        self.fs_ops.iter().copied().find(|ops| ops.name() == name)
    }

    pub fn fs_name(&self, id: u32) -> Option<&'static str> {
        self.fs_operations_by_id(id).map(|ops| ops.name())
    }

    /// Stores the dialect's private state, replacing any previous value.
    pub fn set_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.data = Some(Box::new(data));
    }

    /// Borrows the dialect state as `T`.
    ///
    /// Fails if no state was stored or it belongs to another dialect.
    pub fn data<T: Any + Send + Sync>(&self) -> Result<&T, BackendError> {
        self.data
            .as_ref()
            .and_then(|data| data.downcast_ref::<T>())
            .ok_or_else(|| BackendError::io(format!("{}: dialect state missing", self.transport.id())))
    }

    /// Statistics of one storage area, when the dialect provides them.
    pub fn storage_stats(&self, storage: u32) -> Result<StorageStats, BackendError> {
        match self.connector {
            Some(connector) => connector.storage_stats(self, storage),
            None => Err(BackendError::not_supported("storage_stats")),
        }
    }

    /// Sends a firmware image, when the dialect supports it.
    pub fn upgrade_os(&self, transfer: &mut SysexTransfer) -> Result<(), BackendError> {
        match self.connector {
            Some(connector) => connector.upgrade_os(self, transfer),
            None => Err(BackendError::not_supported("upgrade_os")),
        }
    }

    /// Sends raw sysex bytes, for example the contents of a `.syx` file.
    pub fn send_sysex(&self, bytes: &[u8], job: &JobControl) -> Result<(), BackendError> {
        job.begin(1);
        let mut transfer = SysexTransfer::new(bytes, self.transport.config().sysex_timeout)
            .with_token(job.cancel_token());
        {
            let _exchange = self.transport.begin_exchange();
            let result = self.transport.tx_sysex(&mut transfer);
            self.transport.clear_cache();
            result?;
        }
        job.advance(1.0);
        info!("Sent {} bytes of sysex to {}", bytes.len(), self.name());
        Ok(())
    }

    /// Collects whatever the device dumps until it goes idle.
    pub fn receive_sysex(&self, job: &JobControl) -> Result<Vec<u8>, BackendError> {
        job.begin(1);
        let mut transfer = SysexTransfer::receive(self.transport.config().dump_timeout)
            .batch()
            .with_token(job.cancel_token());
        {
            let _exchange = self.transport.begin_exchange();
            self.transport.rx_sysex(&mut transfer)?;
        }
        job.advance(1.0);
        let bytes = transfer.into_raw();
        info!("Received {} bytes of sysex from {}", bytes.len(), self.name());
        Ok(bytes)
    }

    /// Forgets everything a previous handshake attempt left behind.
    pub(crate) fn reset(&mut self) {
        self.connector = None;
        self.info = DeviceInfo::default();
        self.fs_ops = &[];
        self.data = None;
        self.transport.clear_cache();
    }

    pub(crate) fn bind(&mut self, connector: &'static dyn Connector) {
        self.connector = Some(connector);
    }

    pub(crate) fn into_transport(mut self) -> Transport {
        self.data = None;
        self.transport
    }

    /// Releases the dialect state, then the transport.
    pub fn close(self) {
        debug!("Closing backend {}", self.info.name);
        self.into_transport().close();
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("port", &self.transport.id())
            .field("connector", &self.connector.map(|c| c.name()))
            .field("info", &self.info)
            .finish()
    }
}
