//! USB host adapter seam.
//!
//! The engine never owns the USB controller. Everything it needs from the
//! host stack goes through [`UsbHost`]: open a pipe for an endpoint, submit a
//! non-blocking transfer, poll its completion state on a later tick, and read
//! what arrived. The adapter also exposes the host frame clock and the
//! connection status, which bound the synchronous wrappers.

use crate::error::{Error, Result};

/// Opaque handle of an open pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub u8);

/// USB transfer type of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Control.
    Control,
    /// Isochronous.
    Isochronous,
    /// Bulk.
    Bulk,
    /// Interrupt.
    Interrupt,
}

/// The endpoint fields the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress; bit 7 set for IN.
    pub address: u8,
    /// Transfer type from bmAttributes.
    pub kind: TransferKind,
    /// wMaxPacketSize.
    pub max_packet: u16,
    /// bInterval, in host clock units.
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Device-to-host endpoint.
    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }
}

/// Completion state of the last transfer submitted on a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Still in flight (or nothing submitted).
    Pending,
    /// Completed; byte count and data are available.
    Done,
    /// NAK or transient error; resubmit the same transfer.
    Retry,
    /// Endpoint halted.
    Stalled,
}

/// Host-controller operations consumed by the engine.
///
/// Implementations must not block in any of these calls.
pub trait UsbHost {
    /// Allocate and configure a pipe for `endpoint`, with data toggle reset.
    fn open_pipe(&mut self, endpoint: &EndpointDescriptor) -> Result<PipeId>;

    /// Release a pipe. Closing an unknown pipe is a no-op.
    fn close_pipe(&mut self, pipe: PipeId);

    /// Start an OUT transfer of `data`.
    fn submit_send(&mut self, pipe: PipeId, data: &[u8]) -> Result<()>;

    /// Start an IN transfer of at most `max_len` bytes.
    fn submit_receive(&mut self, pipe: PipeId, max_len: usize) -> Result<()>;

    /// Completion state of the last submission on `pipe`.
    fn poll(&mut self, pipe: PipeId) -> TransferState;

    /// Bytes moved by the last completed transfer on `pipe`.
    fn bytes_transferred(&self, pipe: PipeId) -> usize;

    /// Bytes received by the last completed IN transfer on `pipe`.
    fn received(&self, pipe: PipeId) -> &[u8];

    /// Host frame clock in milliseconds.
    fn now_ms(&self) -> u64;

    /// False once the device has been removed.
    fn is_connected(&self) -> bool;
}

impl<H: UsbHost + ?Sized> UsbHost for &mut H {
    fn open_pipe(&mut self, endpoint: &EndpointDescriptor) -> Result<PipeId> {
        (**self).open_pipe(endpoint)
    }
    fn close_pipe(&mut self, pipe: PipeId) {
        (**self).close_pipe(pipe)
    }
    fn submit_send(&mut self, pipe: PipeId, data: &[u8]) -> Result<()> {
        (**self).submit_send(pipe, data)
    }
    fn submit_receive(&mut self, pipe: PipeId, max_len: usize) -> Result<()> {
        (**self).submit_receive(pipe, max_len)
    }
    fn poll(&mut self, pipe: PipeId) -> TransferState {
        (**self).poll(pipe)
    }
    fn bytes_transferred(&self, pipe: PipeId) -> usize {
        (**self).bytes_transferred(pipe)
    }
    fn received(&self, pipe: PipeId) -> &[u8] {
        (**self).received(pipe)
    }
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// The three endpoints of a still-image (MTP) interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtpEndpoints {
    /// Interrupt IN endpoint carrying events.
    pub notify: EndpointDescriptor,
    /// Bulk IN endpoint (data and responses).
    pub bulk_in: EndpointDescriptor,
    /// Bulk OUT endpoint (operations and outgoing data).
    pub bulk_out: EndpointDescriptor,
}

impl MtpEndpoints {
    /// Pick the notification, bulk IN and bulk OUT endpoints from an
    /// interface's endpoint list. The first match of each wins.
    pub fn from_descriptors(endpoints: &[EndpointDescriptor]) -> Result<Self> {
        let find = |kind: TransferKind, dir_in: bool| {
            endpoints
                .iter()
                .find(|ep| ep.kind == kind && ep.is_in() == dir_in && ep.max_packet > 0)
                .copied()
        };
        Ok(MtpEndpoints {
            notify: find(TransferKind::Interrupt, true)
                .ok_or(Error::MissingEndpoint("interrupt IN"))?,
            bulk_in: find(TransferKind::Bulk, true).ok_or(Error::MissingEndpoint("bulk IN"))?,
            bulk_out: find(TransferKind::Bulk, false).ok_or(Error::MissingEndpoint("bulk OUT"))?,
        })
    }
}

/// An open pipe and the packet size of its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipe {
    /// Adapter handle.
    pub id: PipeId,
    /// Max packet size in bytes.
    pub max_packet: usize,
    /// Polling interval (interrupt endpoints).
    pub interval: u8,
}

/// Pipes opened for one claimed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtpPipes {
    /// Interrupt IN.
    pub notify: Pipe,
    /// Bulk IN.
    pub bulk_in: Pipe,
    /// Bulk OUT.
    pub bulk_out: Pipe,
}

impl MtpPipes {
    /// Open all three pipes. Already-opened pipes are closed again if a later
    /// one fails.
    pub fn open<H: UsbHost>(host: &mut H, endpoints: &MtpEndpoints) -> Result<Self> {
        let notify = open_one(host, &endpoints.notify)?;
        let bulk_in = match open_one(host, &endpoints.bulk_in) {
            Ok(pipe) => pipe,
            Err(e) => {
                host.close_pipe(notify.id);
                return Err(e);
            }
        };
        let bulk_out = match open_one(host, &endpoints.bulk_out) {
            Ok(pipe) => pipe,
            Err(e) => {
                host.close_pipe(bulk_in.id);
                host.close_pipe(notify.id);
                return Err(e);
            }
        };
        tracing::debug!(
            notify = ?notify.id,
            bulk_in = ?bulk_in.id,
            bulk_out = ?bulk_out.id,
            "MTP pipes opened"
        );
        Ok(MtpPipes {
            notify,
            bulk_in,
            bulk_out,
        })
    }

    /// Close all three pipes.
    pub fn close<H: UsbHost>(&self, host: &mut H) {
        host.close_pipe(self.notify.id);
        host.close_pipe(self.bulk_in.id);
        host.close_pipe(self.bulk_out.id);
    }
}

fn open_one<H: UsbHost>(host: &mut H, endpoint: &EndpointDescriptor) -> Result<Pipe> {
    Ok(Pipe {
        id: host.open_pipe(endpoint)?,
        max_packet: endpoint.max_packet as usize,
        interval: endpoint.interval,
    })
}
