use super::*;
use crate::util::write_fixed_string;

/// Address the host stack assigned to a device, `1..=max_devices`
pub type DeviceAddress = u8;

/// Size of an exported device record on the wire, without interfaces
pub const DEVICE_RECORD_SIZE: usize = 312;
/// Size of one interface entry following a device record in OP_REP_DEVLIST
pub const INTERFACE_RECORD_SIZE: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl From<rusb::Version> for Version {
    fn from(value: rusb::Version) -> Self {
        Self {
            major: value.major(),
            minor: value.minor(),
            patch: value.sub_minor(),
        }
    }
}

impl Version {
    /// Decode a binary-coded-decimal version such as `bcdDevice`
    pub fn from_bcd(bcd: u16) -> Self {
        Self {
            major: (((bcd >> 12) & 0xF) * 10 + ((bcd >> 8) & 0xF)) as u8,
            minor: ((bcd >> 4) & 0xF) as u8,
            patch: (bcd & 0xF) as u8,
        }
    }

    pub fn to_bcd(self) -> u16 {
        ((self.major as u16 / 10) << 12)
            | ((self.major as u16 % 10) << 8)
            | ((self.minor as u16 & 0xF) << 4)
            | (self.patch as u16 & 0xF)
    }
}

/// Descriptor information the host stack reports when a device mounts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceDetails {
    pub speed: UsbSpeed,
    pub device_bcd: Version,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub interfaces: Vec<UsbInterface>,
}

/// A USB device currently enumerated on the host controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDevice {
    pub address: DeviceAddress,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Set while exactly one client has imported the device
    pub attached: bool,
    pub details: DeviceDetails,
}

impl HostDevice {
    pub fn bus_id(&self, bus_num: u32) -> String {
        format!("{}-{}", bus_num, self.address)
    }

    /// The exported view of this device, as sent in DEVLIST and IMPORT replies
    pub fn record(&self, bus_num: u32) -> DeviceRecord {
        DeviceRecord {
            path: format!(
                "/sys/devices/platform/usbip-bridge/usb{}/{}",
                bus_num,
                self.bus_id(bus_num)
            ),
            bus_id: self.bus_id(bus_num),
            bus_num,
            dev_num: self.address as u32,
            speed: self.details.speed as u32,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            device_bcd: self.details.device_bcd.to_bcd(),
            device_class: self.details.device_class,
            device_subclass: self.details.device_subclass,
            device_protocol: self.details.device_protocol,
            configuration_value: self.details.configuration_value,
            num_configurations: self.details.num_configurations,
            interfaces: self.details.interfaces.clone(),
        }
    }
}

/// Parse a busid of the form `"<bus>-<addr>"`, NUL padded as on the wire.
///
/// Returns the device address only if the bus matches `bus_num`.
pub fn parse_bus_id(busid: &[u8], bus_num: u32) -> Option<DeviceAddress> {
    let end = busid.iter().position(|&b| b == 0).unwrap_or(busid.len());
    let busid = std::str::from_utf8(&busid[..end]).ok()?;
    let (bus, address) = busid.split_once('-')?;
    if bus.parse::<u32>().ok()? != bus_num {
        return None;
    }
    address.parse::<DeviceAddress>().ok()
}

/// The `usbip_usb_device` structure of the wire protocol
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceRecord {
    pub path: String,
    pub bus_id: String,
    pub bus_num: u32,
    pub dev_num: u32,
    pub speed: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_bcd: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub interfaces: Vec<UsbInterface>,
}

impl DeviceRecord {
    /// Serialize without the trailing interface list, as in OP_REP_IMPORT
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(DEVICE_RECORD_SIZE);
        write_fixed_string(&mut result, &self.path, 256);
        write_fixed_string(&mut result, &self.bus_id, 32);
        result.extend_from_slice(&self.bus_num.to_be_bytes());
        result.extend_from_slice(&self.dev_num.to_be_bytes());
        result.extend_from_slice(&self.speed.to_be_bytes());
        result.extend_from_slice(&self.vendor_id.to_be_bytes());
        result.extend_from_slice(&self.product_id.to_be_bytes());
        result.extend_from_slice(&self.device_bcd.to_be_bytes());
        result.push(self.device_class);
        result.push(self.device_subclass);
        result.push(self.device_protocol);
        result.push(self.configuration_value);
        result.push(self.num_configurations);
        result.push(self.interfaces.len() as u8);
        debug_assert_eq!(result.len(), DEVICE_RECORD_SIZE);
        result
    }

    /// Serialize followed by one entry per interface, as in OP_REP_DEVLIST
    pub fn to_bytes_with_interfaces(&self) -> Vec<u8> {
        let mut result = self.to_bytes();
        for interface in &self.interfaces {
            result.push(interface.interface_class);
            result.push(interface.interface_subclass);
            result.push(interface.interface_protocol);
            // padding
            result.push(0);
        }
        result
    }

    /// Parse a record that is not followed by interfaces.
    ///
    /// The interface count is returned separately; `interfaces` is left empty.
    pub fn from_bytes(bytes: &[u8; DEVICE_RECORD_SIZE]) -> (Self, u8) {
        let u32_at = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u16_at = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        let record = Self {
            path: read_fixed_string(&bytes[0..256]),
            bus_id: read_fixed_string(&bytes[256..288]),
            bus_num: u32_at(288),
            dev_num: u32_at(292),
            speed: u32_at(296),
            vendor_id: u16_at(300),
            product_id: u16_at(302),
            device_bcd: u16_at(304),
            device_class: bytes[306],
            device_subclass: bytes[307],
            device_protocol: bytes[308],
            configuration_value: bytes[309],
            num_configurations: bytes[310],
            interfaces: vec![],
        };
        (record, bytes[311])
    }
}

fn read_fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Devices currently visible on the host controller.
///
/// Slots are indexed by device address, so the registry never grows beyond
/// the capacity it was created with.
#[derive(Debug)]
pub struct DeviceRegistry {
    slots: Vec<Option<HostDevice>>,
}

impl DeviceRegistry {
    pub fn new(max_devices: u8) -> Self {
        Self {
            slots: vec![None; max_devices as usize],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, address: DeviceAddress) -> Option<usize> {
        let index = (address as usize).checked_sub(1)?;
        if index < self.slots.len() {
            Some(index)
        } else {
            None
        }
    }

    /// Register a device; re-adding a live address is a no-op.
    ///
    /// Returns `true` if the device was inserted.
    pub fn add(&mut self, address: DeviceAddress, vendor_id: u16, product_id: u16) -> bool {
        self.add_with_details(address, vendor_id, product_id, DeviceDetails::default())
    }

    pub fn add_with_details(
        &mut self,
        address: DeviceAddress,
        vendor_id: u16,
        product_id: u16,
        details: DeviceDetails,
    ) -> bool {
        let index = match self.slot(address) {
            Some(index) => index,
            None => {
                warn!("Device address {} outside of 1..={}, ignoring", address, self.capacity());
                return false;
            }
        };
        if self.slots[index].is_some() {
            warn!("Device {} already added", address);
            return false;
        }
        debug!(
            "Added device {} ({:04x}:{:04x})",
            address, vendor_id, product_id
        );
        self.slots[index] = Some(HostDevice {
            address,
            vendor_id,
            product_id,
            attached: false,
            details,
        });
        true
    }

    /// Forget a device. Callers cascade the removal to sessions and transfers.
    pub fn remove(&mut self, address: DeviceAddress) -> Option<HostDevice> {
        let removed = self.slot(address).and_then(|index| self.slots[index].take());
        match &removed {
            Some(_) => debug!("Removed device {}", address),
            None => warn!("Device {} not found for removal", address),
        }
        removed
    }

    pub fn find(&self, address: DeviceAddress) -> Option<&HostDevice> {
        self.slot(address).and_then(|index| self.slots[index].as_ref())
    }

    pub fn find_mut(&mut self, address: DeviceAddress) -> Option<&mut HostDevice> {
        let index = self.slot(address)?;
        self.slots[index].as_mut()
    }

    pub fn list(&self) -> impl Iterator<Item = &HostDevice> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.list().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::tests::*;

    #[test]
    fn add_is_idempotent() {
        setup_test_logger();
        let mut registry = DeviceRegistry::new(4);
        assert!(registry.add(1, 0x1234, 0x5678));
        assert!(!registry.add(1, 0x1234, 0x5678));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find(1).unwrap().vendor_id, 0x1234);
    }

    #[test]
    fn duplicate_add_keeps_attached_flag() {
        setup_test_logger();
        let mut registry = DeviceRegistry::new(4);
        registry.add(2, 1, 1);
        registry.find_mut(2).unwrap().attached = true;
        registry.add(2, 1, 1);
        assert!(registry.find(2).unwrap().attached);
    }

    #[test]
    fn rejects_reserved_and_out_of_range_addresses() {
        setup_test_logger();
        let mut registry = DeviceRegistry::new(4);
        assert!(!registry.add(0, 1, 1));
        assert!(!registry.add(5, 1, 1));
        assert!(registry.add(4, 1, 1));
        assert!(!registry.is_empty());
    }

    #[test]
    fn remove_unknown_is_ignored() {
        setup_test_logger();
        let mut registry = DeviceRegistry::new(4);
        assert!(registry.remove(3).is_none());
        registry.add(3, 1, 1);
        assert!(registry.remove(3).is_some());
        assert!(registry.find(3).is_none());
        // address can be reused
        assert!(registry.add(3, 2, 2));
    }

    #[test]
    fn parses_bus_ids() {
        let mut busid = b"1-12".to_vec();
        busid.resize(32, 0);
        assert_eq!(parse_bus_id(&busid, 1), Some(12));
        assert_eq!(parse_bus_id(&busid, 2), None);
        assert_eq!(parse_bus_id(b"1-", 1), None);
        assert_eq!(parse_bus_id(b"garbage", 1), None);
        assert_eq!(parse_bus_id(b"1-300", 1), None);
    }

    #[test]
    fn record_layout() {
        let device = HostDevice {
            address: 7,
            vendor_id: 0x1234,
            product_id: 0x5678,
            attached: false,
            details: DeviceDetails {
                speed: UsbSpeed::High,
                device_bcd: Version::from_bcd(0x0210),
                interfaces: vec![UsbInterface {
                    interface_class: 3,
                    interface_subclass: 1,
                    interface_protocol: 1,
                }],
                ..Default::default()
            },
        };
        let record = device.record(1);
        assert_eq!(record.bus_id, "1-7");
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), DEVICE_RECORD_SIZE);
        assert_eq!(&bytes[256..259], b"1-7");
        assert_eq!(&bytes[300..306], &[0x12, 0x34, 0x56, 0x78, 0x02, 0x10]);
        assert_eq!(bytes[311], 1);
        assert_eq!(
            record.to_bytes_with_interfaces().len(),
            DEVICE_RECORD_SIZE + INTERFACE_RECORD_SIZE
        );

        let (parsed, num_interfaces) =
            DeviceRecord::from_bytes(bytes.as_slice().try_into().unwrap());
        assert_eq!(num_interfaces, 1);
        assert_eq!(parsed.path, record.path);
        assert_eq!(parsed.device_bcd, 0x0210);
    }

    #[test]
    fn bcd_versions() {
        let version = Version::from_bcd(0x1234);
        assert_eq!(version, Version { major: 12, minor: 3, patch: 4 });
        assert_eq!(version.to_bcd(), 0x1234);
    }
}
