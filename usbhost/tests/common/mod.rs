//! Scripted host-controller and driver mocks shared by the integration
//! tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use usbhost::{ClassDriver, HostBus, PipeEvents, Token, UsbCore, UsbError, VbusState};

/// One scripted outcome for the next packet exchange the engine polls.
pub enum Step {
    /// The exchange completes; for IN tokens the payload lands in the pipe
    /// FIFO first.
    Ack(Vec<u8>),
    Nak,
    Timeout,
    /// Toggle mismatch; the mock hardware also flips its toggle, as a
    /// desequenced device would make it do.
    Toggle,
}

pub struct MockState {
    pub script: VecDeque<Step>,
    /// Every token launch, in order.
    pub sent: Vec<(u8, Token)>,
    /// Every FIFO write, in order.
    pub written: Vec<Vec<u8>>,
    /// Pending received bytes for the pipe FIFO.
    pub rx: Vec<u8>,
    pub clock: u64,
    pub vbus: VbusState,
    /// Drop VBUS once the clock passes this point.
    pub vbus_drop_at: Option<u64>,
    pub hw_toggle: bool,
    pub bus_resets: u32,
    pub reset_pending: bool,
    pub sof_enabled: bool,
    pub frozen: u32,
    pub default_pipe_allocs: u32,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            script: VecDeque::new(),
            sent: Vec::new(),
            written: Vec::new(),
            rx: Vec::new(),
            clock: 0,
            vbus: VbusState::Disconnected,
            vbus_drop_at: None,
            hw_toggle: false,
            bus_resets: 0,
            reset_pending: false,
            sof_enabled: false,
            frozen: 0,
            default_pipe_allocs: 0,
        }
    }
}

pub struct MockBus {
    pub state: Rc<RefCell<MockState>>,
}

impl MockBus {
    pub fn new() -> (Self, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState::default()));
        (
            MockBus {
                state: state.clone(),
            },
            state,
        )
    }
}

impl HostBus for MockBus {
    fn alloc_default_pipe(&mut self, _address: u8, _max_packet_size: u16) -> Result<(), UsbError> {
        self.state.borrow_mut().default_pipe_allocs += 1;
        Ok(())
    }

    fn configure_pipe(&mut self, _pipe: u8, _address: u8) {}

    fn write_fifo(&mut self, _pipe: u8, data: &[u8]) {
        self.state.borrow_mut().written.push(data.to_vec());
    }

    fn received_bytes(&mut self, _pipe: u8) -> usize {
        self.state.borrow().rx.len()
    }

    fn read_fifo(&mut self, _pipe: u8, buf: &mut [u8]) {
        let mut state = self.state.borrow_mut();
        let n = buf.len().min(state.rx.len());
        buf[..n].copy_from_slice(&state.rx[..n]);
        state.rx.drain(..n);
    }

    fn send(&mut self, pipe: u8, token: Token) {
        self.state.borrow_mut().sent.push((pipe, token));
    }

    fn transfer_complete(&mut self, _pipe: u8, _token: Token) -> bool {
        let mut state = self.state.borrow_mut();
        if let Some(Step::Ack(_)) = state.script.front() {
            if let Some(Step::Ack(data)) = state.script.pop_front() {
                state.rx = data;
            }
            true
        } else {
            false
        }
    }

    fn take_events(&mut self, _pipe: u8) -> PipeEvents {
        let mut state = self.state.borrow_mut();
        match state.script.front() {
            Some(Step::Nak) => {
                state.script.pop_front();
                PipeEvents::NAK
            }
            Some(Step::Timeout) => {
                state.script.pop_front();
                PipeEvents::TIMEOUT
            }
            Some(Step::Toggle) => {
                state.script.pop_front();
                state.hw_toggle = !state.hw_toggle;
                PipeEvents::TOGGLE_MISMATCH
            }
            _ => PipeEvents::empty(),
        }
    }

    fn freeze_pipe(&mut self, _pipe: u8) {
        self.state.borrow_mut().frozen += 1;
    }

    fn data_toggle(&mut self, _pipe: u8) -> bool {
        self.state.borrow().hw_toggle
    }

    fn set_data_toggle(&mut self, _pipe: u8, toggle: bool) {
        self.state.borrow_mut().hw_toggle = toggle;
    }

    fn zero_count(&mut self, _pipe: u8) {}

    fn bus_reset(&mut self) {
        let mut state = self.state.borrow_mut();
        state.bus_resets += 1;
        state.reset_pending = true;
    }

    fn reset_complete(&mut self) -> bool {
        self.state.borrow().reset_pending
    }

    fn ack_reset(&mut self) {
        self.state.borrow_mut().reset_pending = false;
    }

    fn enable_sof(&mut self) {
        self.state.borrow_mut().sof_enabled = true;
    }

    fn sof_active(&mut self) -> bool {
        self.state.borrow().sof_enabled
    }

    fn vbus_state(&mut self) -> VbusState {
        let state = self.state.borrow();
        if let Some(at) = state.vbus_drop_at {
            if state.clock >= at {
                return VbusState::Disconnected;
            }
        }
        state.vbus
    }

    fn millis(&mut self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.clock += 1;
        state.clock
    }
}

/// An 18-byte full-speed device descriptor.
pub fn device_descriptor_bytes(vid: u16, pid: u16, class: u8, packet_size: u8) -> Vec<u8> {
    vec![
        18,
        1,
        0x00,
        0x02,
        class,
        0,
        0,
        packet_size,
        (vid & 0xFF) as u8,
        (vid >> 8) as u8,
        (pid & 0xFF) as u8,
        (pid >> 8) as u8,
        0x00,
        0x01,
        1,
        2,
        3,
        1,
    ]
}

/// Script one control-IN request: SETUP ack, the payload split into
/// `max_packet` chunks, status ack.
pub fn script_control_in(state: &Rc<RefCell<MockState>>, payload: &[u8], max_packet: usize) {
    let mut st = state.borrow_mut();
    st.script.push_back(Step::Ack(Vec::new()));
    for chunk in payload.chunks(max_packet) {
        st.script.push_back(Step::Ack(chunk.to_vec()));
    }
    st.script.push_back(Step::Ack(Vec::new()));
}

/// Script one no-data control request: SETUP ack, status ack.
pub fn script_control_nodata(state: &Rc<RefCell<MockState>>) {
    let mut st = state.borrow_mut();
    st.script.push_back(Step::Ack(Vec::new()));
    st.script.push_back(Step::Ack(Vec::new()));
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Configure,
    Init,
    Release,
    Poll,
    ResetHubPort(u8),
}

#[derive(Default)]
pub struct DriverState {
    pub owned: u8,
    pub calls: Vec<Call>,
    /// Results for successive configure_device calls; empty means Ok.
    pub configure_results: VecDeque<Result<(), UsbError>>,
    /// Results for successive init calls; empty means Ok.
    pub init_results: VecDeque<Result<(), UsbError>>,
    pub vid_pid: Option<(u16, u16)>,
    pub class: Option<u8>,
    /// Allocate and own an address when configure_device succeeds.
    pub claim_on_configure: bool,
    pub releases: u32,
    pub polls: u32,
}

pub struct MockDriver {
    pub state: Rc<RefCell<DriverState>>,
}

impl MockDriver {
    pub fn new(state: DriverState) -> (Self, Rc<RefCell<DriverState>>) {
        let state = Rc::new(RefCell::new(state));
        (
            MockDriver {
                state: state.clone(),
            },
            state,
        )
    }
}

impl ClassDriver<MockBus> for MockDriver {
    fn configure_device(
        &mut self,
        core: &mut UsbCore<MockBus>,
        parent: u8,
        port: u8,
        _low_speed: bool,
    ) -> Result<(), UsbError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Configure);
        let result = state.configure_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() && state.claim_on_configure && state.owned == 0 {
            let address = core.pool_mut().allocate(parent, false, port);
            if address == 0 {
                return Err(UsbError::AddressPoolExhausted);
            }
            state.owned = address;
        }
        result
    }

    fn init(
        &mut self,
        _core: &mut UsbCore<MockBus>,
        _parent: u8,
        _port: u8,
        _low_speed: bool,
    ) -> Result<(), UsbError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Init);
        state.init_results.pop_front().unwrap_or(Ok(()))
    }

    fn release(&mut self, core: &mut UsbCore<MockBus>) -> Result<(), UsbError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Release);
        if state.owned != 0 {
            core.pool_mut().free(state.owned);
            state.owned = 0;
            state.releases += 1;
        }
        Ok(())
    }

    fn poll(&mut self, _core: &mut UsbCore<MockBus>) -> Result<(), UsbError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Poll);
        state.polls += 1;
        Ok(())
    }

    fn owned_address(&self) -> u8 {
        self.state.borrow().owned
    }

    fn accepts_vid_pid(&self, vid: u16, pid: u16) -> bool {
        self.state.borrow().vid_pid == Some((vid, pid))
    }

    fn accepts_class(&self, class: u8) -> bool {
        self.state.borrow().class == Some(class)
    }

    fn reset_hub_port(
        &mut self,
        _core: &mut UsbCore<MockBus>,
        port: u8,
    ) -> Result<(), UsbError> {
        self.state.borrow_mut().calls.push(Call::ResetHubPort(port));
        Ok(())
    }
}
