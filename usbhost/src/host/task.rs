//! Enumeration state machine and configuration dispatcher.

use std::mem;

use log::{debug, trace, warn};
use smallvec::smallvec;

use crate::bus::{HostBus, VbusState};
use crate::driver::ClassDriver;
use crate::error::UsbError;
use crate::usb::DeviceDescriptor;

use super::pool::EndpointInfo;
use super::UsbCore;

/// Minimum stabilization delay for a freshly attached connection.
pub const SETTLE_DELAY_MS: u64 = 200;

/// Wait after bus reset before talking to the device (USB2 7.1.7.5).
pub const POST_RESET_DELAY_MS: u64 = 20;

/// Wait after an extra bus reset issued during a configuration attempt,
/// padded to compensate for clock inaccuracy.
pub const RESET_SETTLE_MS: u64 = 102;

/// Retry ceiling for one driver's configure/init sequence.
pub const CONFIG_RETRIES: u8 = 3;

/// Pause between configuration retries; some devices fail their first
/// configure right after plug-in and just need a moment.
pub const CONFIG_RETRY_PAUSE_MS: u64 = 100;

/// Enumeration state, advanced one step per [`UsbHost::task`] tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Entry point of the detached family: release drivers, then wait.
    DetachedInitialize,
    DetachedWaitForDevice,
    /// Absorbing: the controller reported an illegal VBUS state. Only a
    /// physical re-attach (a VBUS connected edge) leaves this state.
    DetachedIllegal,
    /// Connection sensed; waiting out the settle delay.
    AttachedSettle,
    AttachedResetDevice,
    AttachedWaitResetComplete,
    /// Reset done; waiting for frame generation plus the post-reset delay.
    AttachedWaitSof,
    Configuring,
    Running,
    /// Absorbing: configuration failed hard; see [`UsbHost::last_error`].
    /// Recovery requires a disconnect/reconnect cycle.
    Error,
}

impl TaskState {
    pub fn is_detached(self) -> bool {
        matches!(
            self,
            TaskState::DetachedInitialize
                | TaskState::DetachedWaitForDevice
                | TaskState::DetachedIllegal
        )
    }
}

/// The engine: transfer core, driver table and enumeration state machine,
/// one instance per bus.
///
/// The application calls [`task`](Self::task) once per tick from a single
/// thread. Driver callbacks run inside the tick and must not re-enter the
/// state machine; they get the [`UsbCore`] only, which cannot.
pub struct UsbHost<B: HostBus> {
    core: UsbCore<B>,
    drivers: Vec<Box<dyn ClassDriver<B>>>,
    state: TaskState,
    deadline: u64,
    low_speed: bool,
    last_error: Option<UsbError>,
}

impl<B: HostBus> UsbHost<B> {
    pub fn new(bus: B) -> Self {
        UsbHost {
            core: UsbCore::new(bus),
            drivers: Vec::new(),
            state: TaskState::DetachedInitialize,
            deadline: 0,
            low_speed: false,
            last_error: None,
        }
    }

    /// Add a driver to the table. Scan order follows registration order
    /// within each matching tier.
    pub fn register_driver(&mut self, driver: Box<dyn ClassDriver<B>>) -> usize {
        self.drivers.push(driver);
        self.drivers.len() - 1
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn last_error(&self) -> Option<UsbError> {
        self.last_error
    }

    pub fn core(&self) -> &UsbCore<B> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut UsbCore<B> {
        &mut self.core
    }

    /// One cooperative tick: sample VBUS, service configured drivers,
    /// advance the enumeration state machine.
    pub fn task(&mut self) {
        match self.core.bus_mut().vbus_state() {
            VbusState::Error => {
                if self.state != TaskState::DetachedIllegal {
                    warn!("illegal VBUS state, bus halted");
                }
                self.state = TaskState::DetachedIllegal;
                self.low_speed = false;
            }
            VbusState::Disconnected => {
                if !self.state.is_detached() {
                    debug!("VBUS lost, device detached");
                    self.state = TaskState::DetachedInitialize;
                    self.low_speed = false;
                }
            }
            VbusState::Connected => {
                if self.state.is_detached() {
                    debug!("VBUS present, settling");
                    self.deadline = self.core.bus_mut().millis() + SETTLE_DELAY_MS;
                    self.state = TaskState::AttachedSettle;
                }
            }
        }

        // Service every configured driver each tick, whatever the
        // enumeration state; device I/O keeps flowing while a sibling port
        // enumerates.
        {
            let UsbHost { core, drivers, .. } = self;
            for driver in drivers.iter_mut() {
                if driver.owned_address() != 0 {
                    if let Err(err) = driver.poll(core) {
                        trace!("driver poll: {}", err);
                    }
                }
            }
        }

        match self.state {
            TaskState::DetachedInitialize => {
                // Free every owned address before waiting for the next
                // attach; release is idempotent for unclaimed drivers.
                let UsbHost { core, drivers, .. } = self;
                for driver in drivers.iter_mut() {
                    if let Err(err) = driver.release(core) {
                        warn!("driver release failed: {}", err);
                    }
                }
                self.state = TaskState::DetachedWaitForDevice;
            }
            TaskState::DetachedWaitForDevice | TaskState::DetachedIllegal => {}
            TaskState::AttachedSettle => {
                if self.core.bus_mut().millis() >= self.deadline {
                    self.state = TaskState::AttachedResetDevice;
                }
            }
            TaskState::AttachedResetDevice => {
                debug!("issuing bus reset");
                self.core.bus_mut().bus_reset();
                self.state = TaskState::AttachedWaitResetComplete;
            }
            TaskState::AttachedWaitResetComplete => {
                let bus = self.core.bus_mut();
                if bus.reset_complete() {
                    bus.ack_reset();
                    bus.enable_sof();
                    self.deadline = bus.millis() + POST_RESET_DELAY_MS;
                    self.state = TaskState::AttachedWaitSof;
                }
            }
            TaskState::AttachedWaitSof => {
                let bus = self.core.bus_mut();
                if bus.sof_active() && bus.millis() >= self.deadline {
                    self.state = TaskState::Configuring;
                }
            }
            TaskState::Configuring => {
                let low_speed = self.low_speed;
                match self.configure(0, 0, low_speed) {
                    Ok(()) => {
                        debug!("device configured, running");
                        self.state = TaskState::Running;
                    }
                    // Transient: leave the state alone so the next tick
                    // retries the whole configuration.
                    Err(UsbError::DeviceInitIncomplete) => {}
                    Err(err) => {
                        warn!("configuration failed: {}", err);
                        self.last_error = Some(err);
                        self.state = TaskState::Error;
                    }
                }
            }
            TaskState::Running | TaskState::Error => {}
        }
    }

    /// Configure whatever device currently answers on address 0.
    ///
    /// Walks the driver table as described in the module docs: predicate
    /// matches first (VID/PID matchers ahead of class matchers), then a
    /// blind pass over the remaining unclaimed drivers, then driverless
    /// address-only attachment.
    pub fn configure(&mut self, parent: u8, port: u8, low_speed: bool) -> Result<(), UsbError> {
        // Park a minimal 8-byte record on the pseudo-device for first
        // contact and keep the previous record to put back afterwards.
        // Restoring unconditionally keeps unrelated enumeration attempts
        // from corrupting each other's toggle state on address 0.
        let saved = {
            let slot0 = self
                .core
                .pool_mut()
                .get_mut(0)
                .ok_or(UsbError::AddressNotFound(0))?;
            slot0.low_speed = low_speed;
            mem::replace(
                &mut slot0.endpoints,
                smallvec![EndpointInfo::control_default()],
            )
        };

        let result = self.configure_inner(parent, port, low_speed);

        if let Some(slot0) = self.core.pool_mut().get_mut(0) {
            slot0.endpoints = saved;
        }
        result
    }

    fn configure_inner(&mut self, parent: u8, port: u8, low_speed: bool) -> Result<(), UsbError> {
        let mut raw = [0u8; mem::size_of::<DeviceDescriptor>()];
        self.core.get_device_descriptor(0, 0, &mut raw)?;
        let desc: &DeviceDescriptor =
            plain::from_bytes(&raw).map_err(|_| UsbError::InvalidArgument)?;
        let vid = { desc.vendor };
        let pid = { desc.product };
        let class = desc.class;
        let packet_size = desc.packet_size;

        debug!(
            "configuring {:04x}:{:04x} class {:02x} on {}:{}",
            vid, pid, class, parent, port
        );

        // First contact told us endpoint 0's real packet size; use it for
        // all further address-0 traffic until the record is restored.
        if let Ok(ep0) = self.core.pool_mut().endpoint_mut(0, 0) {
            ep0.max_packet_size = u16::from(packet_size);
        }

        // Pass 1: drivers whose predicate matches the device, VID/PID
        // matchers ahead of class matchers. Any result other than "not
        // supported" ends the scan.
        let mut order: Vec<usize> = Vec::with_capacity(self.drivers.len());
        for (index, driver) in self.drivers.iter().enumerate() {
            if driver.owned_address() == 0 && driver.accepts_vid_pid(vid, pid) {
                order.push(index);
            }
        }
        for (index, driver) in self.drivers.iter().enumerate() {
            if driver.owned_address() == 0
                && !driver.accepts_vid_pid(vid, pid)
                && driver.accepts_class(class)
            {
                order.push(index);
            }
        }
        for index in order {
            match self.attempt_config(index, parent, port, low_speed) {
                Err(UsbError::DeviceNotSupported) => continue,
                other => return other,
            }
        }

        // Pass 2: blind attempt with every unclaimed driver that did not get
        // a shot above. "Not supported" and "instance in use" both fall
        // through to driverless attachment.
        for index in 0..self.drivers.len() {
            {
                let driver = &self.drivers[index];
                if driver.owned_address() != 0
                    || driver.accepts_vid_pid(vid, pid)
                    || driver.accepts_class(class)
                {
                    continue;
                }
            }
            match self.attempt_config(index, parent, port, low_speed) {
                Err(UsbError::DeviceNotSupported) | Err(UsbError::InstanceInUse) => continue,
                other => return other,
            }
        }

        // Nothing claimed the device; it can still sit on the bus with an
        // address and no owning driver.
        self.default_addressing(parent, port, low_speed)
    }

    /// Run one driver's configure/init sequence with bounded retry.
    ///
    /// "Requires additional reset" is not a retry: it means the device needs
    /// re-priming, so the upstream port is reset and the configure replayed
    /// without burning a retry. It is honored once per attempt; a device
    /// that keeps asking gets its error returned.
    fn attempt_config(
        &mut self,
        index: usize,
        parent: u8,
        port: u8,
        low_speed: bool,
    ) -> Result<(), UsbError> {
        let mut retries = 0u8;
        let mut reset_done = false;
        loop {
            let configure_result = {
                let UsbHost { core, drivers, .. } = self;
                drivers[index].configure_device(core, parent, port, low_speed)
            };
            match configure_result {
                Ok(()) => {}
                Err(UsbError::RequiresAdditionalReset) if !reset_done => {
                    reset_done = true;
                    self.reset_upstream_port(parent, port);
                    continue;
                }
                // Deterministic answers; retrying would not change them.
                Err(
                    err @ (UsbError::RequiresAdditionalReset
                    | UsbError::DeviceNotSupported
                    | UsbError::InstanceInUse),
                ) => return Err(err),
                Err(err) if retries < CONFIG_RETRIES => {
                    trace!("configure retry after: {}", err);
                    retries += 1;
                    self.core.delay_ms(CONFIG_RETRY_PAUSE_MS);
                    continue;
                }
                Err(err) => return Err(err),
            }

            let init_result = {
                let UsbHost { core, drivers, .. } = self;
                drivers[index].init(core, parent, port, low_speed)
            };
            match init_result {
                Ok(()) => return Ok(()),
                Err(err) if retries < CONFIG_RETRIES => {
                    trace!("init retry after: {}", err);
                    retries += 1;
                    self.core.delay_ms(CONFIG_RETRY_PAUSE_MS);
                }
                Err(err) => {
                    // The device may be in a limbo state; knock it back to a
                    // known one before giving up.
                    self.reset_upstream_port(parent, port);
                    return Err(err);
                }
            }
        }
    }

    /// Reset the port the device under configuration hangs off: a bus reset
    /// at the root, or a hub-port reset through the driver owning the parent
    /// address.
    fn reset_upstream_port(&mut self, parent: u8, port: u8) {
        if parent == 0 {
            debug!("extra bus reset on root port");
            self.core.bus_mut().bus_reset();
            self.core.delay_ms(RESET_SETTLE_MS);
        } else {
            let UsbHost { core, drivers, .. } = self;
            match drivers
                .iter_mut()
                .find(|driver| driver.owned_address() == parent)
            {
                Some(hub) => {
                    if let Err(err) = hub.reset_hub_port(core, port) {
                        warn!("hub {} port {} reset failed: {}", parent, port, err);
                    }
                }
                None => warn!("no driver owns hub address {}", parent),
            }
        }
    }

    /// Address-only attachment: allocate an address and move the device to
    /// it, leaving it driverless on the bus.
    fn default_addressing(&mut self, parent: u8, port: u8, low_speed: bool) -> Result<(), UsbError> {
        {
            let slot0 = self
                .core
                .pool_mut()
                .get_mut(0)
                .ok_or(UsbError::AddressNotFound(0))?;
            if slot0.endpoints.is_empty() {
                return Err(UsbError::NoEndpointTable(0));
            }
            slot0.low_speed = low_speed;
        }

        let address = self.core.pool_mut().allocate(parent, false, port);
        if address == 0 {
            return Err(UsbError::AddressPoolExhausted);
        }
        if let Some(slot) = self.core.pool_mut().get_mut(address) {
            slot.low_speed = low_speed;
        }

        if let Err(err) = self.core.set_address(0, 0, address) {
            // Any failure past allocation must give the address back or the
            // pool leaks the slot.
            self.core.pool_mut().free(address);
            return Err(err);
        }
        debug!("driverless attachment at address {}", address);
        Ok(())
    }

    /// Release whichever driver owns `address`. Success when nothing does.
    pub fn release_device(&mut self, address: u8) -> Result<(), UsbError> {
        if address == 0 {
            return Ok(());
        }
        let UsbHost { core, drivers, .. } = self;
        for driver in drivers.iter_mut() {
            if driver.owned_address() == address {
                return driver.release(core);
            }
        }
        Ok(())
    }
}
