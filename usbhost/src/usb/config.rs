/// A USB Configuration Descriptor header (USB2 9.6.3).
///
/// `total_length` covers the configuration descriptor plus all interface and
/// endpoint descriptors that follow it, which is what the two-stage
/// configuration read keys off.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigDescriptor {
    /// bLength.
    pub length: u8,
    /// bDescriptorType.
    pub kind: u8,
    /// wTotalLength: combined length of all descriptors in this configuration.
    pub total_length: u16,
    /// bNumInterfaces.
    pub interfaces: u8,
    /// bConfigurationValue: the value SET_CONFIGURATION selects this with.
    pub configuration_value: u8,
    /// iConfiguration string descriptor index.
    pub configuration_str: u8,
    /// bmAttributes.
    pub attributes: u8,
    /// bMaxPower, in 2mA units.
    pub max_power: u8,
}

unsafe impl plain::Plain for ConfigDescriptor {}

impl ConfigDescriptor {
    pub const WIRE_SIZE: usize = 9;
}
