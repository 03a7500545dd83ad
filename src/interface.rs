/// Class triplet of one interface, as listed in OP_REP_DEVLIST
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsbInterface {
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
}

impl From<&rusb::InterfaceDescriptor<'_>> for UsbInterface {
    fn from(desc: &rusb::InterfaceDescriptor<'_>) -> Self {
        Self {
            interface_class: desc.class_code(),
            interface_subclass: desc.sub_class_code(),
            interface_protocol: desc.protocol_code(),
        }
    }
}
