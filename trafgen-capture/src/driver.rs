//! The seam between the engine and the packet-capture facility.
//!
//! The engine consumes exactly five capabilities: device enumeration,
//! opening a direction-restricted handle, a blocking callback loop,
//! submission of a pre-built send queue, and (where the platform has them)
//! out-of-band NIC counters. Anything that can provide these — libpcap,
//! a raw socket, a kernel-bypass stack — can sit behind these traits.

use std::sync::Arc;

use crate::error::Result;
use crate::sendq::SendQueue;

/// A device reported by the driver's enumeration.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    /// Interface name; may be empty on exotic platforms.
    pub name: String,
    /// Human-readable description, when the driver has one.
    pub description: Option<String>,
}

/// Direction restriction applied to a handle at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Only traffic arriving on the interface.
    In,
    /// Only traffic leaving the interface.
    Out,
}

/// How an open handle delivers its observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    /// Periodic `{pkts, bytes}` interval summaries.
    Stats,
    /// One callback per captured packet.
    Capture,
}

/// One delivery of the capture loop.
#[derive(Debug, Clone, Copy)]
pub enum CaptureEvent<'a> {
    /// Statistics-mode summary covering the interval since the previous
    /// delivery. `bytes` includes one packet-record header per packet,
    /// which the consumer subtracts again.
    Stats {
        /// Packets seen in the interval.
        pkts: u64,
        /// Bytes seen in the interval, record headers included.
        bytes: u64,
        /// Driver timestamp of the delivery, microseconds.
        ts_usec: u64,
    },
    /// Capture-mode per-packet delivery.
    Packet {
        /// On-wire length of the packet, no record-header adjustment.
        wire_len: u32,
        /// Driver timestamp of the packet, microseconds.
        ts_usec: u64,
        /// Captured bytes.
        data: &'a [u8],
    },
}

/// Why [`CaptureHandle::run_loop`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// [`CaptureHandle::break_loop`] was called; the clean shutdown path.
    Solicited,
    /// The driver failed underneath the loop.
    Error(String),
}

/// NIC counters retrievable out of band on platforms that expose them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicCounter {
    /// Frames the NIC received without error.
    RxOk,
    /// Frames the NIC transmitted without error.
    TxOk,
}

/// One open capture handle.
///
/// A handle is owned by its port and shared with exactly one monitor
/// worker. All methods take `&self`: submission happens from the service
/// thread while the monitor is blocked in [`run_loop`], so implementations
/// must tolerate that overlap.
pub trait CaptureHandle: Send + Sync {
    /// Whether this handle delivers summaries or per-packet callbacks.
    fn mode(&self) -> HandleMode;

    /// Name of the handle's data-link type, used as a port-name suffix.
    fn datalink(&self) -> &str;

    /// Run the callback loop until [`CaptureHandle::break_loop`] is called
    /// or the driver fails. Blocks the calling thread.
    fn run_loop(&self, callback: &mut dyn FnMut(CaptureEvent<'_>)) -> LoopExit;

    /// Make a blocked [`CaptureHandle::run_loop`] return
    /// [`LoopExit::Solicited`]. Safe to call from any thread.
    fn break_loop(&self);

    /// Submit a pre-built send queue and return the number of bytes
    /// consumed, per-packet descriptors included. A short count means a
    /// partial transmission.
    fn transmit(&self, queue: &SendQueue) -> Result<u64>;

    /// Retrieve a NIC counter; `Err` on drivers without the capability.
    fn nic_counter(&self, counter: NicCounter) -> Result<u64>;
}

/// The capture facility itself.
pub trait CaptureDriver: Send + Sync {
    /// Enumerate the devices the driver can open.
    fn devices(&self) -> Result<Vec<DeviceDesc>>;

    /// Open `device` restricted to `direction`. The driver chooses
    /// statistics mode when the platform supports it and plain capture
    /// mode otherwise; the returned handle reports which.
    fn open(&self, device: &str, direction: Direction) -> Result<Arc<dyn CaptureHandle>>;
}
