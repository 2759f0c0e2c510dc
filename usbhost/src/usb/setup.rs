/// The 8-byte SETUP packet that opens every control transfer (USB2 9.3).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Setup {
    /// bmRequestType: direction, type and recipient bits.
    pub kind: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

unsafe impl plain::Plain for Setup {}

#[repr(u8)]
pub enum ReqDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

#[repr(u8)]
pub enum ReqType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

#[repr(u8)]
pub enum ReqRecipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
    // 4..=30 are reserved
    VendorSpecific = 31,
}

/// Standard request codes (USB2 Table 9-4).
#[repr(u8)]
#[derive(Clone, Copy, Debug)]
pub enum SetupReq {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

pub const USB_SETUP_DIR_BIT: u8 = 1 << 7;
pub const USB_SETUP_REQ_TY_MASK: u8 = 0x60;
pub const USB_SETUP_REQ_TY_SHIFT: u8 = 5;
pub const USB_SETUP_RECIPIENT_MASK: u8 = 0x1F;

/// bmRequestType for standard device-to-host requests (GET_DESCRIPTOR and
/// friends).
pub const REQ_DEVICE_TO_HOST: u8 = 0b1000_0000;
/// bmRequestType for standard host-to-device requests (SET_ADDRESS,
/// SET_CONFIGURATION and friends).
pub const REQ_HOST_TO_DEVICE: u8 = 0b0000_0000;

impl Setup {
    pub fn direction(&self) -> ReqDirection {
        if self.kind & USB_SETUP_DIR_BIT == 0 {
            ReqDirection::HostToDevice
        } else {
            ReqDirection::DeviceToHost
        }
    }

    pub const fn req_ty(&self) -> u8 {
        (self.kind & USB_SETUP_REQ_TY_MASK) >> USB_SETUP_REQ_TY_SHIFT
    }

    pub const fn req_recipient(&self) -> u8 {
        self.kind & USB_SETUP_RECIPIENT_MASK
    }

    pub fn is_in(&self) -> bool {
        self.kind & USB_SETUP_DIR_BIT != 0
    }
}
