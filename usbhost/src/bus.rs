//! The hardware-abstraction boundary.
//!
//! The engine never touches host-controller registers. Every hardware
//! interaction goes through [`HostBus`], which a controller driver implements
//! over its pipe/FIFO register file. The trait surface is deliberately small:
//! pipe allocation and addressing, FIFO access, token dispatch with
//! completion/status polling, bus reset, VBUS sensing, start-of-frame control
//! and a monotonic millisecond clock.

use crate::error::UsbError;

/// State of the bus power line, as sensed by the controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VbusState {
    /// Illegal electrical state; unrecoverable until physical re-attachment.
    Error,
    Disconnected,
    Connected,
}

/// Token kinds the dispatcher can launch on a pipe.
///
/// The handshake variants are the zero-length status-stage exchanges of a
/// control transfer (USB2 8.5.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Token {
    Setup,
    In,
    Out,
    /// Status-stage IN handshake.
    InHandshake,
    /// Status-stage OUT handshake.
    OutHandshake,
}

bitflags::bitflags! {
    /// Device-reported conditions latched by the controller while a transfer
    /// is in flight. Reading them through [`HostBus::take_events`] clears the
    /// hardware flags.
    #[derive(Default)]
    #[repr(transparent)]
    pub struct PipeEvents: u8 {
        /// Flow control: the device answered NAK.
        const NAK = 1 << 0;
        /// Bus-level timeout: the device did not answer at all.
        const TIMEOUT = 1 << 1;
        /// DATA0/DATA1 sequencing mismatch.
        const TOGGLE_MISMATCH = 1 << 2;
    }
}

/// Host-controller capability set consumed by the engine.
///
/// Implementations are expected to be cheap to poll; the dispatcher calls
/// [`transfer_complete`](Self::transfer_complete) and
/// [`take_events`](Self::take_events) in a tight loop until its deadline.
pub trait HostBus {
    /// Make sure the default control pipe exists, sized for `max_packet_size`
    /// bytes and bound to `address`.
    fn alloc_default_pipe(&mut self, address: u8, max_packet_size: u16) -> Result<(), UsbError>;

    /// Point `pipe` at the device with the given bus address.
    fn configure_pipe(&mut self, pipe: u8, address: u8);

    /// Load the pipe's transmit FIFO.
    fn write_fifo(&mut self, pipe: u8, data: &[u8]);

    /// Number of bytes the last completed IN exchange deposited in the pipe.
    fn received_bytes(&mut self, pipe: u8) -> usize;

    /// Drain up to `buf.len()` received bytes out of the pipe's FIFO.
    fn read_fifo(&mut self, pipe: u8, buf: &mut [u8]);

    /// Launch one packet exchange. Completion and error conditions are polled
    /// afterwards, not returned here.
    fn send(&mut self, pipe: u8, token: Token);

    /// Has the exchange launched by [`send`](Self::send) completed?
    fn transfer_complete(&mut self, pipe: u8, token: Token) -> bool;

    /// Read-and-clear the latched device-reported conditions on `pipe`.
    fn take_events(&mut self, pipe: u8) -> PipeEvents;

    /// Stop activity on the pipe after a finished or aborted transfer.
    fn freeze_pipe(&mut self, pipe: u8);

    /// Current hardware DATA0/DATA1 toggle for the pipe. This is the
    /// authoritative value software resynchronizes from after a toggle
    /// mismatch.
    fn data_toggle(&mut self, pipe: u8) -> bool;

    /// Force the pipe's DATA0/DATA1 toggle.
    fn set_data_toggle(&mut self, pipe: u8, toggle: bool);

    /// Zero the pipe's transfer byte count, preparing a zero-length handshake.
    fn zero_count(&mut self, pipe: u8);

    /// Drive a reset condition onto the bus.
    fn bus_reset(&mut self);

    /// Has the reset signalling completed?
    fn reset_complete(&mut self) -> bool;

    /// Acknowledge and clear the reset-complete condition.
    fn ack_reset(&mut self);

    /// Start generating start-of-frame packets.
    fn enable_sof(&mut self);

    /// Are frames currently being generated?
    fn sof_active(&mut self) -> bool;

    fn vbus_state(&mut self) -> VbusState;

    /// Monotonic milliseconds since some fixed point.
    fn millis(&mut self) -> u64;
}
