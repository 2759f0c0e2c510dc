//! The transfer engine.
//!
//! [`UsbCore`] layers the control/bulk transfer protocol on top of the packet
//! dispatcher, which in turn is the only code that waits on hardware.
//! [`UsbHost`] (in [`task`]) adds the enumeration state machine and the
//! driver table on top of the core.

pub mod pool;
pub mod task;

pub use self::pool::{AddressPool, DeviceSlot, EndpointInfo, NAK_MAX_POWER, USB_NUMDEVICES};
pub use self::task::{TaskState, UsbHost};

use log::{trace, warn};

use crate::bus::{HostBus, PipeEvents, Token, VbusState};
use crate::error::UsbError;
use crate::usb::setup::{Setup, SetupReq, REQ_DEVICE_TO_HOST, REQ_HOST_TO_DEVICE, USB_SETUP_DIR_BIT};
use crate::usb::{ConfigDescriptor, DescriptorKind};

/// Overall deadline for one packet exchange.
pub const XFER_TIMEOUT_MS: u64 = 500;

/// Bus-timeout retry ceiling inside one dispatch.
pub const RETRY_LIMIT: u8 = 3;

/// Settle time after a successful SET_ADDRESS before any traffic to the new
/// address. USB2 9.2.6.3 allows 2ms, but older devices want far more.
pub const SET_ADDRESS_SETTLE_MS: u64 = 300;

/// Buffer size for the two-stage configuration descriptor read.
const CONF_BUF_SIZE: usize = 64;

/// How a toggle mismatch inside the IN loop is handled: the control data
/// stage surfaces it to the caller (who replays the whole request), bulk
/// replays just the offending packet.
#[derive(Clone, Copy, Eq, PartialEq)]
enum ToggleRecovery {
    Fail,
    RetryPacket,
}

/// Streaming callback for control reads larger than the caller's interest:
/// called once with the received bytes and their offset in the full transfer.
pub type DataCallback<'a> = &'a mut dyn FnMut(&[u8], usize);

/// The transfer engine: address pool plus transfer protocol over a
/// [`HostBus`].
///
/// Class drivers get `&mut UsbCore` in every callback and issue their device
/// traffic through it.
pub struct UsbCore<B: HostBus> {
    bus: B,
    pool: AddressPool,
}

impl<B: HostBus> UsbCore<B> {
    pub fn new(bus: B) -> Self {
        UsbCore {
            bus,
            pool: AddressPool::new(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut AddressPool {
        &mut self.pool
    }

    /// Busy-wait on the bus clock. The engine has no scheduler underneath;
    /// this occupies the calling thread just like an in-flight transfer does.
    pub fn delay_ms(&mut self, ms: u64) {
        let deadline = self.bus.millis() + ms;
        while self.bus.millis() < deadline {}
    }

    /// Resolve `(address, ep)` to a working copy of the endpoint record, bind
    /// the pipe to the device address and compute the NAK limit.
    ///
    /// The copy is written back through [`store_endpoint`](Self::store_endpoint)
    /// once its toggle state is final.
    fn select_pipe(&mut self, address: u8, ep: u8) -> Result<(EndpointInfo, u16), UsbError> {
        let info = *self.pool.endpoint(address, ep)?;
        let nak_limit = info.nak_limit();
        trace!(
            "select pipe: addr {} ep {} nak_limit {}",
            address,
            ep,
            nak_limit
        );
        self.bus.configure_pipe(info.address, address);
        Ok((info, nak_limit))
    }

    fn store_endpoint(&mut self, address: u8, info: EndpointInfo) {
        if let Ok(stored) = self.pool.endpoint_mut(address, info.address) {
            *stored = info;
        }
    }

    /// Launch one packet exchange and poll it to completion.
    ///
    /// Waits until the transfer deadline or loss of bus power, whichever
    /// comes first, reacting to the three device-reported conditions:
    ///
    /// - NAK: counted; with a nonzero `nak_limit` the flow-control outcome is
    ///   returned on exactly the limit-th NAK. A zero limit means NAKs are
    ///   not counted and only the deadline applies.
    /// - Bus timeout: retried up to [`RETRY_LIMIT`] times.
    /// - Toggle mismatch: returned immediately; recovery belongs to the
    ///   caller, which knows which toggle bit to resynchronize.
    ///
    /// VBUS loss is reported as its own outcome so a physical disconnect is
    /// never misattributed to a protocol failure.
    pub fn dispatch_packet(
        &mut self,
        token: Token,
        pipe: u8,
        nak_limit: u16,
    ) -> Result<(), UsbError> {
        trace!("dispatch {:?} pipe {} nak_limit {}", token, pipe, nak_limit);
        let deadline = self.bus.millis() + XFER_TIMEOUT_MS;
        let mut nak_count: u16 = 0;
        let mut retry_count: u8 = 0;

        self.bus.send(pipe, token);

        loop {
            if self.bus.transfer_complete(pipe, token) {
                return Ok(());
            }
            if self.bus.vbus_state() != VbusState::Connected {
                return Err(UsbError::VbusLost);
            }
            if self.bus.millis() >= deadline {
                return Err(UsbError::TransferTimeout);
            }

            let events = self.bus.take_events(pipe);
            if events.contains(PipeEvents::NAK) {
                nak_count += 1;
                if nak_limit != 0 && nak_count >= nak_limit {
                    return Err(UsbError::NakLimit);
                }
            }
            if events.contains(PipeEvents::TIMEOUT) {
                retry_count += 1;
                if retry_count >= RETRY_LIMIT {
                    return Err(UsbError::BusTimeout);
                }
            }
            if events.contains(PipeEvents::TOGGLE_MISMATCH) {
                return Err(UsbError::DataToggle);
            }
        }
    }

    /// Full control request: SETUP stage, optional data stage, status stage.
    ///
    /// `total` is the request's wLength; `buf` (when present) is the data
    /// stage buffer, its direction taken from the bmRequestType direction
    /// bit. `on_data` is invoked once after an IN data stage has fully
    /// arrived (or ended early with a short packet).
    ///
    /// A toggle error surfaced during the data stage resynchronizes the
    /// endpoint's toggle bit from hardware before the error is returned, so
    /// the caller can replay the request without desequencing the endpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn control_request(
        &mut self,
        address: u8,
        ep: u8,
        req_type: u8,
        request: u8,
        value_lo: u8,
        value_hi: u8,
        index: u16,
        total: u16,
        mut buf: Option<&mut [u8]>,
        on_data: Option<DataCallback<'_>>,
    ) -> Result<(), UsbError> {
        let (mut pep, nak_limit) = self.select_pipe(address, ep)?;

        // The control pipe is shared by every control exchange; make sure it
        // exists before touching the FIFO.
        self.bus.alloc_default_pipe(address, pep.max_packet_size)?;

        let dir_in = req_type & USB_SETUP_DIR_BIT != 0;

        let setup = Setup {
            kind: req_type,
            request,
            value: u16::from(value_lo) | (u16::from(value_hi) << 8),
            index,
            length: total,
        };
        self.bus
            .write_fifo(pep.address, unsafe { plain::as_bytes(&setup) });
        if let Err(err) = self.dispatch_packet(Token::Setup, pep.address, nak_limit) {
            self.store_endpoint(address, pep);
            return Err(err);
        }

        if let Some(data) = buf.take() {
            if dir_in {
                // The data stage always starts on DATA1 (USB2 8.5.3).
                pep.recv_toggle = true;
                match self.in_transfer_inner(&mut pep, nak_limit, data, ToggleRecovery::Fail) {
                    Ok(received) => {
                        if let Some(cb) = on_data {
                            cb(&data[..received], 0);
                        }
                    }
                    Err(err) => {
                        self.store_endpoint(address, pep);
                        return Err(err);
                    }
                }
            } else {
                pep.send_toggle = true;
                if let Err(err) = self.out_transfer_inner(&mut pep, nak_limit, data) {
                    self.store_endpoint(address, pep);
                    return Err(err);
                }
            }
        }

        // Status stage: zero-length handshake in the direction opposite the
        // data stage (IN when there was no data stage), always DATA1.
        self.bus.zero_count(pep.address);
        self.bus.set_data_toggle(pep.address, true);
        let token = if dir_in {
            Token::OutHandshake
        } else {
            Token::InHandshake
        };
        let result = self.dispatch_packet(token, pep.address, nak_limit);
        self.store_endpoint(address, pep);
        result
    }

    /// Bulk/interrupt IN transfer: accumulate IN packets into `buf` until it
    /// is full or the device sends a short packet (standard USB
    /// end-of-transfer for bulk). Returns the number of bytes received, never
    /// more than `buf.len()`.
    pub fn in_transfer(&mut self, address: u8, ep: u8, buf: &mut [u8]) -> Result<usize, UsbError> {
        let (mut pep, nak_limit) = self.select_pipe(address, ep)?;
        let result = self.in_transfer_inner(&mut pep, nak_limit, buf, ToggleRecovery::RetryPacket);
        self.store_endpoint(address, pep);
        result
    }

    /// Bulk/interrupt OUT transfer: write `data` in max-packet-sized chunks.
    pub fn out_transfer(&mut self, address: u8, ep: u8, data: &[u8]) -> Result<(), UsbError> {
        let (mut pep, nak_limit) = self.select_pipe(address, ep)?;
        let result = self.out_transfer_inner(&mut pep, nak_limit, data);
        self.store_endpoint(address, pep);
        result
    }

    fn in_transfer_inner(
        &mut self,
        pep: &mut EndpointInfo,
        nak_limit: u16,
        buf: &mut [u8],
        recovery: ToggleRecovery,
    ) -> Result<usize, UsbError> {
        let max_packet = pep.max_packet_size as usize;
        if max_packet < 1 || max_packet > 64 {
            return Err(UsbError::InvalidMaxPacketSize(pep.max_packet_size));
        }
        self.bus.set_data_toggle(pep.address, pep.recv_toggle);

        let mut received = 0usize;
        let result = loop {
            match self.dispatch_packet(Token::In, pep.address, nak_limit) {
                Ok(()) => {}
                Err(UsbError::DataToggle) => {
                    // The device has not accepted our acknowledgment for this
                    // packet yet; resynchronize from hardware and (for bulk)
                    // replay the same packet without advancing the buffer.
                    pep.recv_toggle = self.bus.data_toggle(pep.address);
                    self.bus.set_data_toggle(pep.address, pep.recv_toggle);
                    if recovery == ToggleRecovery::RetryPacket {
                        continue;
                    }
                    break Err(UsbError::DataToggle);
                }
                Err(err) => break Err(err),
            }

            let mut packet = self.bus.received_bytes(pep.address);
            if packet > buf.len() - received {
                // The device can legally send more than we asked for on the
                // final packet; trim rather than overrun the caller's buffer.
                packet = buf.len() - received;
            }
            self.bus
                .read_fifo(pep.address, &mut buf[received..received + packet]);
            received += packet;

            // The transfer is complete when the device sends a short packet
            // or the requested length has arrived.
            if packet < max_packet || received >= buf.len() {
                pep.recv_toggle = self.bus.data_toggle(pep.address);
                break Ok(received);
            }
        };

        self.bus.freeze_pipe(pep.address);
        result
    }

    fn out_transfer_inner(
        &mut self,
        pep: &mut EndpointInfo,
        nak_limit: u16,
        data: &[u8],
    ) -> Result<(), UsbError> {
        let max_packet = pep.max_packet_size as usize;
        if max_packet < 1 || max_packet > 64 {
            return Err(UsbError::InvalidMaxPacketSize(pep.max_packet_size));
        }
        self.bus.set_data_toggle(pep.address, pep.send_toggle);

        let mut result = Ok(());
        'chunks: for chunk in data.chunks(max_packet) {
            loop {
                self.bus.write_fifo(pep.address, chunk);
                match self.dispatch_packet(Token::Out, pep.address, nak_limit) {
                    Ok(()) => continue 'chunks,
                    Err(UsbError::DataToggle) => {
                        // Resynchronize and replay the same chunk.
                        pep.send_toggle = self.bus.data_toggle(pep.address);
                        self.bus.set_data_toggle(pep.address, pep.send_toggle);
                    }
                    Err(err) => {
                        // The dispatcher has already burned this chunk's NAK
                        // budget / timeout retries; anything reaching us here
                        // aborts the transfer.
                        warn!("out transfer aborted on chunk: {}", err);
                        result = Err(err);
                        break 'chunks;
                    }
                }
            }
        }

        // Whatever happened above, leave the software toggle in the state the
        // hardware is actually in.
        pep.send_toggle = self.bus.data_toggle(pep.address);
        result
    }

    /// Read the device descriptor into `buf` (18 bytes for the full
    /// descriptor, 8 for the short form).
    pub fn get_device_descriptor(
        &mut self,
        address: u8,
        ep: u8,
        buf: &mut [u8],
    ) -> Result<(), UsbError> {
        let len = buf.len() as u16;
        self.control_request(
            address,
            ep,
            REQ_DEVICE_TO_HOST,
            SetupReq::GetDescriptor as u8,
            0x00,
            DescriptorKind::Device as u8,
            0,
            len,
            Some(buf),
            None,
        )
    }

    /// Read one configuration descriptor with everything that follows it.
    ///
    /// Two requests: a 9-byte header read for `wTotalLength`, then the full
    /// read. The full read is delivered through `buf` (and `on_data`, when
    /// streaming); devices with configurations larger than `buf` get
    /// truncated at the buffer boundary.
    pub fn get_configuration_descriptor(
        &mut self,
        address: u8,
        ep: u8,
        conf_index: u8,
        on_data: Option<DataCallback<'_>>,
    ) -> Result<(), UsbError> {
        let mut buf = [0u8; CONF_BUF_SIZE];

        // Some devices refuse header reads shorter than the full 9 bytes.
        self.control_request(
            address,
            ep,
            REQ_DEVICE_TO_HOST,
            SetupReq::GetDescriptor as u8,
            conf_index,
            DescriptorKind::Configuration as u8,
            0,
            ConfigDescriptor::WIRE_SIZE as u16,
            Some(&mut buf[..ConfigDescriptor::WIRE_SIZE]),
            None,
        )?;
        let header: &ConfigDescriptor = plain::from_bytes(&buf[..ConfigDescriptor::WIRE_SIZE])
            .map_err(|_| UsbError::InvalidArgument)?;
        let total = header.total_length;

        self.control_request(
            address,
            ep,
            REQ_DEVICE_TO_HOST,
            SetupReq::GetDescriptor as u8,
            conf_index,
            DescriptorKind::Configuration as u8,
            0,
            total,
            Some(&mut buf),
            on_data,
        )
    }

    /// Read a string descriptor.
    pub fn get_string_descriptor(
        &mut self,
        address: u8,
        ep: u8,
        str_index: u8,
        lang_id: u16,
        buf: &mut [u8],
    ) -> Result<(), UsbError> {
        let len = buf.len() as u16;
        self.control_request(
            address,
            ep,
            REQ_DEVICE_TO_HOST,
            SetupReq::GetDescriptor as u8,
            str_index,
            DescriptorKind::String as u8,
            lang_id,
            len,
            Some(buf),
            None,
        )
    }

    /// SET_ADDRESS, issued to the device's current (old) address. Waits for
    /// the device to actually move before returning.
    pub fn set_address(&mut self, old_address: u8, ep: u8, new_address: u8) -> Result<(), UsbError> {
        self.control_request(
            old_address,
            ep,
            REQ_HOST_TO_DEVICE,
            SetupReq::SetAddress as u8,
            new_address,
            0x00,
            0,
            0,
            None,
            None,
        )?;
        self.delay_ms(SET_ADDRESS_SETTLE_MS);
        Ok(())
    }

    /// SET_CONFIGURATION.
    pub fn set_configuration(&mut self, address: u8, ep: u8, conf_value: u8) -> Result<(), UsbError> {
        self.control_request(
            address,
            ep,
            REQ_HOST_TO_DEVICE,
            SetupReq::SetConfiguration as u8,
            conf_value,
            0x00,
            0,
            0,
            None,
            None,
        )
    }
}
