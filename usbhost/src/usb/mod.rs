//! USB wire-format structures and constants shared between the engine and
//! class drivers.

pub mod config;
pub mod device;
pub mod setup;

pub use self::config::ConfigDescriptor;
pub use self::device::DeviceDescriptor;
pub use self::setup::{Setup, SetupReq, REQ_DEVICE_TO_HOST, REQ_HOST_TO_DEVICE};

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DescriptorKind {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
}

/// US English, the language id virtually every device implements.
pub const LANG_ID_ENGLISH_US: u16 = 0x0409;
