//! Host USB
//!
//! The boundary between the server and the USB host-controller stack. Calls
//! into the stack go through [HostController]; everything the stack reports
//! back (mounts, unmounts and completions) is a [HostEvent] sent through a
//! [HostEventSink], possibly from another thread, and handled later on the
//! server's event task.
use super::*;
use tokio::sync::mpsc;

mod libusb;

pub use libusb::*;

/// How the host stack finished a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostResult {
    Success,
    Stalled,
    Timeout,
    Failed,
}

impl HostResult {
    /// The RET_SUBMIT status for this result
    pub fn status(self) -> i32 {
        match self {
            HostResult::Success => 0,
            HostResult::Stalled => -errno::EPIPE,
            HostResult::Timeout => -errno::ETIMEDOUT,
            HostResult::Failed => -errno::EIO,
        }
    }
}

impl From<rusb::Error> for HostResult {
    fn from(error: rusb::Error) -> Self {
        match error {
            rusb::Error::Pipe => HostResult::Stalled,
            rusb::Error::Timeout => HostResult::Timeout,
            _ => HostResult::Failed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    DeviceMounted {
        address: DeviceAddress,
        vendor_id: u16,
        product_id: u16,
        details: DeviceDetails,
    },
    DeviceUnmounted {
        address: DeviceAddress,
    },
    TransferComplete {
        address: DeviceAddress,
        endpoint: EndpointIndex,
        /// Token the transfer was submitted with
        token: TransferToken,
        result: HostResult,
        /// Bytes moved on the bus
        actual_length: u32,
        /// Received bytes of an IN transfer
        data: Option<Vec<u8>>,
    },
}

/// Where the host stack delivers its events
#[derive(Clone, Debug)]
pub struct HostEventSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

pub type HostEventReceiver = mpsc::UnboundedReceiver<HostEvent>;

pub fn host_event_channel() -> (HostEventSink, HostEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HostEventSink { tx }, rx)
}

impl HostEventSink {
    /// Returns `false` once the server stopped listening
    pub fn send(&self, event: HostEvent) -> bool {
        trace!("Host event: {:?}", event);
        self.tx.send(event).is_ok()
    }

    pub fn device_mounted(
        &self,
        address: DeviceAddress,
        vendor_id: u16,
        product_id: u16,
        details: DeviceDetails,
    ) -> bool {
        self.send(HostEvent::DeviceMounted {
            address,
            vendor_id,
            product_id,
            details,
        })
    }

    pub fn device_unmounted(&self, address: DeviceAddress) -> bool {
        self.send(HostEvent::DeviceUnmounted { address })
    }

    pub fn transfer_complete(
        &self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
        token: TransferToken,
        result: HostResult,
        actual_length: u32,
        data: Option<Vec<u8>>,
    ) -> bool {
        self.send(HostEvent::TransferComplete {
            address,
            endpoint,
            token,
            result,
            actual_length,
            data,
        })
    }
}

/// Calls the server makes into the USB host stack.
///
/// Every method only queues work and must return without blocking: the
/// server calls them with its state locked. A `true` return promises exactly
/// one later [HostEvent::TransferComplete] carrying the submitted `token` (or
/// the device's [HostEvent::DeviceUnmounted]).
///
/// A transfer that can not be aborted still completes with its own token,
/// which lets the server tell it apart from a later transfer on the same
/// endpoint.
pub trait HostController: Send + Sync {
    /// Queue a control transfer on endpoint 0.
    ///
    /// `length` is wLength: the number of bytes to read for an IN request.
    /// OUT requests carry their data stage in `out_data`.
    fn submit_control(
        &self,
        address: DeviceAddress,
        token: TransferToken,
        setup: [u8; 8],
        out_data: &[u8],
        length: u32,
    ) -> bool;

    /// Queue a bulk or interrupt transfer, whichever `endpoint` is
    fn submit_bulk_or_interrupt(
        &self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
        token: TransferToken,
        out_data: &[u8],
        length: u32,
    ) -> bool;

    /// Best effort: abort whatever runs on `endpoint` and clear its halt
    fn request_halt_clear(&self, address: DeviceAddress, endpoint: EndpointIndex) -> bool;
}
