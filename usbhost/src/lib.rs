//! A polled USB host-side protocol engine.
//!
//! This crate drives enumeration and transfers for devices hanging off a single
//! USB root port (and, through hub class drivers, the ports behind it). It owns
//! the logical bus-address pool, the per-device endpoint tables, and the
//! control/bulk/interrupt transfer protocol with the retry semantics USB
//! mandates for NAK, bus-timeout and data-toggle conditions.
//!
//! The host-controller hardware itself is out of scope: everything the engine
//! needs from it (pipe FIFOs, token dispatch, completion/flow/timeout/toggle
//! status, bus reset, VBUS sensing, start-of-frame generation and a millisecond
//! clock) is consumed through the [`bus::HostBus`] trait. Device-class drivers
//! plug in through [`driver::ClassDriver`] and are offered newly attached
//! devices by the configuration dispatcher.
//!
//! Execution is single-threaded and cooperative: the application calls
//! [`host::UsbHost::task`] once per tick. There is no background thread and no
//! preemption; the only blocking behavior is the transfer dispatcher's wait
//! loop, which busy-polls the hardware completion flags up to a bounded
//! deadline. Callers must tolerate a `task` tick occupying the thread for up to
//! that deadline (hundreds of milliseconds) while a transfer is in flight.
//!
//! This documentation refers to the relevant standard as follows:
//!
//! - USB2 - [Universal Serial Bus Specification](https://www.usb.org/document-library/usb-20-specification)

pub mod bus;
pub mod driver;
pub mod error;
pub mod host;
pub mod usb;

pub use crate::bus::{HostBus, PipeEvents, Token, VbusState};
pub use crate::driver::ClassDriver;
pub use crate::error::UsbError;
pub use crate::host::{AddressPool, DeviceSlot, EndpointInfo, TaskState, UsbCore, UsbHost};
