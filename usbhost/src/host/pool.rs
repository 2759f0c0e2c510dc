//! Logical address pool and per-device endpoint tables.
//!
//! The pool owns one pseudo-device slot (address 0, used by every enumeration
//! attempt before an address is assigned) and the addressed-device slots
//! behind it. Endpoint records are owned by the slot they belong to; class
//! drivers install their tables with [`AddressPool::set_endpoint_table`] and
//! the transfer protocol keeps the toggle bits in these records in sync with
//! the hardware.

use smallvec::{smallvec, SmallVec};

use crate::error::UsbError;

/// Number of device slots, address 0 included. Addresses 1..=15 are
/// assignable.
pub const USB_NUMDEVICES: usize = 16;

/// Ceiling for the per-endpoint NAK power. `2^15 - 1` retries is effectively
/// "bounded by the transfer deadline only".
pub const NAK_MAX_POWER: u8 = 15;

/// Per-endpoint transfer state.
///
/// The toggle bits must mirror the hardware DATA0/DATA1 state after every
/// completed or toggle-erroring transfer; the transfer protocol
/// resynchronizes them from hardware rather than guessing.
#[derive(Clone, Copy, Debug)]
pub struct EndpointInfo {
    /// Endpoint address, 0..=15. Direction is implied by the token used on
    /// it, not stored here.
    pub address: u8,
    /// Maximum packet size, 1..=64 for full-speed devices.
    pub max_packet_size: u16,
    /// DATA0/DATA1 state of the next OUT packet.
    pub send_toggle: bool,
    /// DATA0/DATA1 state of the next IN packet.
    pub recv_toggle: bool,
    /// NAK tolerance exponent; see [`EndpointInfo::nak_limit`].
    pub nak_power: u8,
}

impl EndpointInfo {
    /// The default control endpoint as it looks before a device has told us
    /// anything about itself: 8-byte packets, unlimited NAK patience.
    pub const fn control_default() -> Self {
        EndpointInfo {
            address: 0,
            max_packet_size: 8,
            send_toggle: false,
            recv_toggle: false,
            nak_power: NAK_MAX_POWER,
        }
    }

    /// Bounded NAK retry count: `2^min(nak_power, NAK_MAX_POWER) - 1`.
    /// Zero means "do not count NAKs at all".
    pub fn nak_limit(&self) -> u16 {
        let power = self.nak_power.min(NAK_MAX_POWER);
        ((1u32 << power) - 1) as u16
    }
}

/// An addressed-device record.
#[derive(Clone, Debug, Default)]
pub struct DeviceSlot {
    /// Logical bus address. 0 is the enumeration pseudo-address.
    pub address: u8,
    /// Address of the hub this device hangs off, 0 for the root port.
    pub parent: u8,
    /// Upstream port number on the parent.
    pub port: u8,
    pub low_speed: bool,
    pub is_hub: bool,
    /// Endpoint table, installed by the owning driver.
    pub endpoints: SmallVec<[EndpointInfo; 4]>,
    in_use: bool,
}

/// Fixed-size pool of device slots.
///
/// Slot 0 is permanently allocated and reused for every new attach; slots
/// 1..N are handed out first-free by [`allocate`](Self::allocate).
pub struct AddressPool {
    slots: [DeviceSlot; USB_NUMDEVICES],
}

impl Default for AddressPool {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressPool {
    pub fn new() -> Self {
        let mut slots: [DeviceSlot; USB_NUMDEVICES] = Default::default();
        // The pseudo-device is always live and always reachable through the
        // default control endpoint.
        slots[0].in_use = true;
        slots[0].endpoints = smallvec![EndpointInfo::control_default()];
        AddressPool { slots }
    }

    /// Look up the slot for a bus address. `None` for addresses that were
    /// never allocated or have been freed.
    pub fn get(&self, address: u8) -> Option<&DeviceSlot> {
        self.slots
            .get(address as usize)
            .filter(|slot| slot.in_use)
    }

    pub fn get_mut(&mut self, address: u8) -> Option<&mut DeviceSlot> {
        self.slots
            .get_mut(address as usize)
            .filter(|slot| slot.in_use)
    }

    /// Claim the first unused slot in 1..N. Returns the new address, or 0
    /// when the pool is exhausted; callers must treat 0 as failure, never as
    /// a valid address.
    pub fn allocate(&mut self, parent: u8, is_hub: bool, port: u8) -> u8 {
        for (index, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if slot.in_use {
                continue;
            }
            slot.in_use = true;
            slot.address = index as u8;
            slot.parent = parent;
            slot.port = port;
            slot.is_hub = is_hub;
            log::debug!("address pool: allocated {} (parent {}, port {})", index, parent, port);
            return index as u8;
        }
        log::warn!("address pool: exhausted");
        0
    }

    /// Return a slot to the pool. The low-speed flag and the endpoint table
    /// are cleared so the next allocation at this index starts from a clean
    /// slot. Freeing address 0 or an unknown address is a no-op.
    pub fn free(&mut self, address: u8) {
        if address == 0 {
            return;
        }
        if let Some(slot) = self.slots.get_mut(address as usize) {
            if !slot.in_use {
                return;
            }
            log::debug!("address pool: freed {}", address);
            *slot = DeviceSlot::default();
        }
    }

    /// Install (or replace) a device's endpoint table. This is the entry
    /// point class drivers use once they know the device's endpoint layout.
    pub fn set_endpoint_table(
        &mut self,
        address: u8,
        endpoints: &[EndpointInfo],
    ) -> Result<(), UsbError> {
        if endpoints.is_empty() {
            return Err(UsbError::InvalidArgument);
        }
        let slot = self
            .get_mut(address)
            .ok_or(UsbError::AddressNotFound(address))?;
        slot.address = address;
        slot.endpoints = SmallVec::from_slice(endpoints);
        Ok(())
    }

    /// Find the endpoint record for `(address, ep)`.
    pub fn endpoint(&self, address: u8, ep: u8) -> Result<&EndpointInfo, UsbError> {
        let slot = self.get(address).ok_or(UsbError::AddressNotFound(address))?;
        if slot.endpoints.is_empty() {
            return Err(UsbError::NoEndpointTable(address));
        }
        slot.endpoints
            .iter()
            .find(|info| info.address == ep)
            .ok_or(UsbError::EpNotFound(ep))
    }

    pub fn endpoint_mut(&mut self, address: u8, ep: u8) -> Result<&mut EndpointInfo, UsbError> {
        let slot = self
            .get_mut(address)
            .ok_or(UsbError::AddressNotFound(address))?;
        if slot.endpoints.is_empty() {
            return Err(UsbError::NoEndpointTable(address));
        }
        slot.endpoints
            .iter_mut()
            .find(|info| info.address == ep)
            .ok_or(UsbError::EpNotFound(ep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot0_always_present() {
        let pool = AddressPool::new();
        let slot0 = pool.get(0).unwrap();
        assert_eq!(slot0.endpoints.len(), 1);
        assert_eq!(slot0.endpoints[0].max_packet_size, 8);
    }

    #[test]
    fn allocate_first_free() {
        let mut pool = AddressPool::new();
        assert_eq!(pool.allocate(0, false, 0), 1);
        assert_eq!(pool.allocate(0, false, 0), 2);
        pool.free(1);
        // Freed slot is reused before a fresh one.
        assert_eq!(pool.allocate(5, true, 3), 1);
        let slot = pool.get(1).unwrap();
        assert_eq!(slot.parent, 5);
        assert_eq!(slot.port, 3);
        assert!(slot.is_hub);
    }

    #[test]
    fn exhaustion_returns_zero() {
        let mut pool = AddressPool::new();
        for expected in 1..USB_NUMDEVICES as u8 {
            assert_eq!(pool.allocate(0, false, 0), expected);
        }
        assert_eq!(pool.allocate(0, false, 0), 0);
    }

    #[test]
    fn lookup_tracks_lifecycle() {
        let mut pool = AddressPool::new();
        let addr = pool.allocate(0, false, 1);
        assert!(pool.get(addr).is_some());
        pool.free(addr);
        assert!(pool.get(addr).is_none());
    }

    #[test]
    fn free_detaches_endpoint_state() {
        let mut pool = AddressPool::new();
        let addr = pool.allocate(0, false, 0);
        let mut ep = EndpointInfo::control_default();
        ep.address = 2;
        ep.send_toggle = true;
        pool.set_endpoint_table(addr, &[ep]).unwrap();
        pool.get_mut(addr).unwrap().low_speed = true;

        pool.free(addr);

        // A later allocation landing on the same index must not observe the
        // old endpoint table or the old low-speed flag.
        let addr2 = pool.allocate(9, false, 4);
        assert_eq!(addr2, addr);
        let slot = pool.get(addr2).unwrap();
        assert!(slot.endpoints.is_empty());
        assert!(!slot.low_speed);
        assert!(matches!(
            pool.endpoint(addr2, 2),
            Err(UsbError::NoEndpointTable(_))
        ));
    }

    #[test]
    fn free_of_zero_or_unknown_is_noop() {
        let mut pool = AddressPool::new();
        pool.free(0);
        pool.free(7);
        assert!(pool.get(0).is_some());
    }

    #[test]
    fn endpoint_lookup_errors() {
        let mut pool = AddressPool::new();
        assert!(matches!(
            pool.endpoint(4, 0),
            Err(UsbError::AddressNotFound(4))
        ));
        let addr = pool.allocate(0, false, 0);
        assert!(matches!(
            pool.endpoint(addr, 0),
            Err(UsbError::NoEndpointTable(_))
        ));
        pool.set_endpoint_table(addr, &[EndpointInfo::control_default()])
            .unwrap();
        assert!(pool.endpoint(addr, 0).is_ok());
        assert!(matches!(pool.endpoint(addr, 3), Err(UsbError::EpNotFound(3))));
        assert!(matches!(
            pool.set_endpoint_table(addr, &[]),
            Err(UsbError::InvalidArgument)
        ));
    }

    #[test]
    fn nak_limit_from_power() {
        let mut ep = EndpointInfo::control_default();
        ep.nak_power = 0;
        assert_eq!(ep.nak_limit(), 0);
        ep.nak_power = 1;
        assert_eq!(ep.nak_limit(), 1);
        ep.nak_power = 4;
        assert_eq!(ep.nak_limit(), 15);
        // Powers above the ceiling clamp to it.
        ep.nak_power = 200;
        assert_eq!(ep.nak_limit(), (1 << 15) - 1);
    }
}
