//! The "Device" USB descriptor (USB2 9.6.1).

/// A USB Device Descriptor.
///
/// Field offsets follow USB2 Table 9-8. The engine only consumes the vendor,
/// product, class and `packet_size` fields when picking an address and a
/// driver; everything else is passed through to class drivers.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceDescriptor {
    /// bLength: the length of this descriptor in bytes.
    pub length: u8,
    /// bDescriptorType, see [crate::usb::DescriptorKind].
    pub kind: u8,
    /// bcdUSB: the USB standard version in binary-coded decimal.
    pub usb: u16,
    /// bDeviceClass. 0xFF is vendor specific; 0 defers class information to
    /// the interfaces.
    pub class: u8,
    /// bDeviceSubClass.
    pub sub_class: u8,
    /// bDeviceProtocol, qualified by class and sub_class.
    pub protocol: u8,
    /// bMaxPacketSize0: maximum packet size for endpoint 0.
    pub packet_size: u8,
    /// idVendor.
    pub vendor: u16,
    /// idProduct.
    pub product: u16,
    /// bcdDevice: device release number in binary-coded decimal.
    pub release: u16,
    /// iManufacturer string descriptor index.
    pub manufacturer_str: u8,
    /// iProduct string descriptor index.
    pub product_str: u8,
    /// iSerialNumber string descriptor index.
    pub serial_str: u8,
    /// bNumConfigurations.
    pub configurations: u8,
}

unsafe impl plain::Plain for DeviceDescriptor {}

impl DeviceDescriptor {
    pub fn minor_usb_vers(&self) -> u8 {
        (self.usb & 0xFF) as u8
    }
    pub fn major_usb_vers(&self) -> u8 {
        ((self.usb >> 8) & 0xFF) as u8
    }
}
