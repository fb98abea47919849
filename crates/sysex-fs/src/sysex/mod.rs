//! System Exclusive exchanges on top of a [`Transport`].
//!
//! A [`SysexTransfer`] describes one exchange: the bytes to send (if any), a
//! deadline, whether to collect a batch of messages, and the cancel token of
//! the job that owns it. Receives poll the transport at the configured
//! interval and check the token before every poll, so cancellation latency is
//! bounded by the poll interval. At a given check, cancellation wins over the
//! deadline.

pub(crate) mod framer;
#[cfg(test)]
mod sysex_test;

pub use framer::SysexFramer;

use log::{debug, trace};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::TX_CHUNK_LEN;
use crate::errors::BackendError;
use crate::job_control::CancelToken;
use crate::transport::{Transport, timed_out};

pub const SYSEX_START: u8 = 0xf0;
pub const SYSEX_END: u8 = 0xf7;

/// Universal non-realtime Identity Request, addressed to all devices.
pub const IDENTITY_REQUEST: [u8; 6] = [0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SysexStatus {
    Waiting,
    Sending,
    Receiving,
    Finished,
}

/// One sysex exchange.
///
/// `raw` holds the outgoing request until the exchange runs, and the received
/// bytes afterwards. In batch mode the received messages are concatenated.
#[derive(Debug, Clone)]
pub struct SysexTransfer {
    raw: Vec<u8>,
    timeout: Duration,
    batch: bool,
    cacheable: bool,
    status: SysexStatus,
    active: CancelToken,
}

impl SysexTransfer {
    /// A request that expects a reply within `timeout`.
    pub fn new(request: impl Into<Vec<u8>>, timeout: Duration) -> Self {
        Self {
            raw: request.into(),
            timeout,
            batch: false,
            cacheable: true,
            status: SysexStatus::Waiting,
            active: CancelToken::new(),
        }
    }

    /// A receive with nothing to send.
    pub fn receive(timeout: Duration) -> Self {
        Self::new(Vec::new(), timeout)
    }

    /// Collects messages until the sender goes idle instead of stopping at the first.
    pub fn batch(mut self) -> Self {
        self.batch = true;
        self
    }

    /// Always goes to the device, bypassing the response cache both ways.
    ///
    /// For requests with side effects on the device, or whose answer changes
    /// with every write.
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Shares the cancel token of a job.
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.active = token;
        self
    }

    pub fn status(&self) -> SysexStatus {
        self.status
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

impl Transport {
    /// Writes the transfer's bytes in chunks, checking cancellation between them.
    ///
    /// Does not claim the exchange slot. Use [`Transport::tx_and_rx`] unless
    /// the caller already holds it.
    pub fn tx_sysex(&self, transfer: &mut SysexTransfer) -> Result<(), BackendError> {
        transfer.status = SysexStatus::Sending;
        for chunk in transfer.raw.chunks(TX_CHUNK_LEN) {
            if let Err(e) = transfer.active.check() {
                transfer.status = SysexStatus::Finished;
                return Err(e);
            }
            if let Err(e) = self.send(chunk) {
                transfer.status = SysexStatus::Finished;
                return Err(e);
            }
        }
        transfer.status = SysexStatus::Waiting;
        Ok(())
    }

    /// Waits for one complete message, or for a batch in batch mode, and stores
    /// it in the transfer.
    ///
    /// A batch ends once the sender has been idle for the batch idle timeout
    /// after the first message. Without any message the transfer times out.
    pub fn rx_sysex(&self, transfer: &mut SysexTransfer) -> Result<(), BackendError> {
        transfer.status = SysexStatus::Receiving;
        let result = self.receive_messages(transfer);
        transfer.status = SysexStatus::Finished;
        transfer.raw = result?;
        Ok(())
    }

    fn receive_messages(&self, transfer: &SysexTransfer) -> Result<Vec<u8>, BackendError> {
        let start = Instant::now();
        let mut last_message = start;
        let mut received = Vec::new();
        let mut count = 0usize;

        loop {
            transfer.active.check()?;
            self.poll_framer()?;

            while let Some(msg) = self.next_message() {
                trace!("Received {} byte sysex message on {}", msg.len(), self.id());
                received.extend_from_slice(&msg);
                count += 1;
                last_message = Instant::now();
                if !transfer.batch {
                    return Ok(received);
                }
            }

            let (since, limit) = if count == 0 {
                (start, transfer.timeout)
            } else {
                (last_message, self.config().batch_idle_timeout)
            };
            let elapsed = since.elapsed();
            if elapsed >= limit {
                if count == 0 {
                    debug!("No sysex reply on {} within {:?}", self.id(), transfer.timeout);
                    return Err(timed_out(transfer.timeout));
                }
                debug!("Batch of {} messages ({} bytes) from {}", count, received.len(), self.id());
                return Ok(received);
            }
            std::thread::sleep(self.config().poll_interval.min(limit - elapsed));
        }
    }

    /// Sends the request and waits for the reply, holding the exchange slot.
    ///
    /// With the response cache enabled, a request seen before is answered from
    /// the cache without touching the port.
    pub fn tx_and_rx(&self, transfer: &mut SysexTransfer) -> Result<(), BackendError> {
        let _exchange = self.begin_exchange();
        self.tx_and_rx_locked(transfer)
    }

    fn tx_and_rx_locked(&self, transfer: &mut SysexTransfer) -> Result<(), BackendError> {
        let request = transfer.raw.clone();
        let cacheable = transfer.cacheable && !request.is_empty();
        if cacheable
            && let Some(cached) = self.cached_response(&request)
        {
            trace!("Cache hit for {} byte request on {}", request.len(), self.id());
            transfer.raw = cached;
            transfer.status = SysexStatus::Finished;
            return Ok(());
        }

        self.tx_sysex(transfer)?;
        self.rx_sysex(transfer)?;
        if cacheable {
            self.cache_response(&request, &transfer.raw);
        }
        Ok(())
    }

    /// Request/response exchange returning the reply bytes.
    pub fn transact(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, BackendError> {
        let mut transfer = SysexTransfer::new(request, timeout);
        self.tx_and_rx(&mut transfer)?;
        Ok(transfer.into_raw())
    }

    /// Like [`Transport::transact`], observing `cancel` while waiting.
    pub fn transact_cancellable(
        &self,
        request: &[u8],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, BackendError> {
        let mut transfer = SysexTransfer::new(request, timeout).with_token(cancel.clone());
        self.tx_and_rx(&mut transfer)?;
        Ok(transfer.into_raw())
    }

    /// Sends a message without waiting for a reply.
    ///
    /// A message sent without a reply may change device state, so cached
    /// responses are dropped even when the write fails halfway.
    pub fn tx(&self, msg: &[u8]) -> Result<(), BackendError> {
        let _exchange = self.begin_exchange();
        let mut transfer = SysexTransfer::new(msg, self.config().sysex_timeout);
        let result = self.tx_sysex(&mut transfer);
        self.clear_cache();
        result
    }
}
