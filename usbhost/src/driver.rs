//! The device-class driver contract.

use crate::bus::HostBus;
use crate::error::UsbError;
use crate::host::UsbCore;

/// A device-class driver, one instance per slot in the host's driver table.
///
/// Every callback receives the transfer engine so the driver can issue
/// control/bulk traffic and install its endpoint table; drivers never touch
/// the bus directly.
///
/// Address ownership is exclusive: at most one driver owns a given address,
/// and a driver with a nonzero [`owned_address`](Self::owned_address) is
/// skipped by the configuration dispatcher until it releases.
pub trait ClassDriver<B: HostBus> {
    /// First contact with a newly attached device. The device is still at
    /// address 0; a successful configure typically allocates an address,
    /// moves the device to it and installs an endpoint table.
    ///
    /// `Err(UsbError::DeviceNotSupported)` lets the dispatcher continue its
    /// scan; `Err(UsbError::RequiresAdditionalReset)` asks it to reset the
    /// upstream port and try again.
    fn configure_device(
        &mut self,
        core: &mut UsbCore<B>,
        parent: u8,
        port: u8,
        low_speed: bool,
    ) -> Result<(), UsbError>;

    /// Class-level bring-up after a successful configure.
    fn init(
        &mut self,
        core: &mut UsbCore<B>,
        parent: u8,
        port: u8,
        low_speed: bool,
    ) -> Result<(), UsbError>;

    /// Give back the owned address (and free it in the pool). Must be
    /// idempotent: releasing an unclaimed driver succeeds and leaves
    /// [`owned_address`](Self::owned_address) at 0.
    fn release(&mut self, core: &mut UsbCore<B>) -> Result<(), UsbError>;

    /// Periodic service call, issued every engine tick while the driver owns
    /// a device, regardless of what the enumeration state machine is doing.
    fn poll(&mut self, core: &mut UsbCore<B>) -> Result<(), UsbError>;

    /// Address of the device this driver currently owns, 0 when unclaimed.
    fn owned_address(&self) -> u8;

    /// Does this driver claim the given vendor/product pair?
    fn accepts_vid_pid(&self, _vid: u16, _pid: u16) -> bool {
        false
    }

    /// Does this driver claim the given device class code?
    fn accepts_class(&self, _class: u8) -> bool {
        false
    }

    /// Reset a downstream port. Only meaningful for hub drivers; the
    /// dispatcher calls this on the driver owning a parent address when a
    /// child device asks for an additional reset.
    fn reset_hub_port(&mut self, _core: &mut UsbCore<B>, _port: u8) -> Result<(), UsbError> {
        Err(UsbError::DeviceNotSupported)
    }
}
