//! Host stack backed by libusb, through rusb
use super::*;
use crate::config::{filters_allow, DeviceFilter, UsbSettings};
use crate::util::{lock, read_lock, write_lock};
use rusb::{ConfigDescriptor, DeviceHandle, GlobalContext, TransferType};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;

/// Physical position of a device: bus number and bus address
type BusLocation = (u8, u8);

/// A device found on the bus that passes the export filters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportableDevice {
    pub bus_number: u8,
    pub bus_address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub speed: UsbSpeed,
    pub device_class: u8,
}

impl ExportableDevice {
    fn location(&self) -> BusLocation {
        (self.bus_number, self.bus_address)
    }
}

impl std::fmt::Display for ExportableDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {:04x}:{:04x} ({:?} speed, class {:#04x})",
            self.bus_number,
            self.bus_address,
            self.vendor_id,
            self.product_id,
            self.speed,
            self.device_class
        )
    }
}

fn scan_bus(
    filters: &[DeviceFilter],
) -> Result<Vec<(rusb::Device<GlobalContext>, ExportableDevice)>> {
    let mut devices = vec![];
    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(err) => {
                warn!(
                    "Impossible to get device descriptor for {:?}: {}, ignoring device",
                    device, err
                );
                continue;
            }
        };
        if desc.class_code() == HUB_CLASS {
            continue;
        }
        if !filters_allow(filters, desc.vendor_id(), desc.product_id()) {
            trace!(
                "Device {:04x}:{:04x} ignored by filter",
                desc.vendor_id(),
                desc.product_id()
            );
            continue;
        }
        let found = ExportableDevice {
            bus_number: device.bus_number(),
            bus_address: device.address(),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            speed: device.speed().into(),
            device_class: desc.class_code(),
        };
        devices.push((device, found));
    }
    Ok(devices)
}

/// Devices on the host that would be exported with `filters`
pub fn list_exportable_devices(filters: &[DeviceFilter]) -> Result<Vec<ExportableDevice>> {
    Ok(scan_bus(filters)?.into_iter().map(|(_, found)| found).collect())
}

/// Claim every interface of `config`, returning the ones that could be claimed
fn claim_interfaces(
    handle: &mut DeviceHandle<GlobalContext>,
    config: &ConfigDescriptor,
) -> Vec<u8> {
    let mut claimed = vec![];
    for interface in config.interfaces() {
        match handle.claim_interface(interface.number()) {
            Ok(()) => claimed.push(interface.number()),
            Err(err) => warn!("Failed to claim interface {}: {}", interface.number(), err),
        }
    }
    claimed
}

/// Transfer type of every endpoint in any alternate setting of `config`
fn endpoint_types(config: &ConfigDescriptor) -> HashMap<u8, TransferType> {
    config
        .interfaces()
        .flat_map(|interface| interface.descriptors())
        .flat_map(|desc| {
            desc.endpoint_descriptors()
                .map(|ep| (ep.address(), ep.transfer_type()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// What a finished libusb call turns into
#[derive(Debug, PartialEq, Eq)]
struct Completion {
    result: HostResult,
    actual_length: u32,
    data: Option<Vec<u8>>,
}

impl Completion {
    fn received(data: Vec<u8>) -> Self {
        Self {
            result: HostResult::Success,
            actual_length: data.len() as u32,
            data: Some(data),
        }
    }

    fn sent(length: usize) -> Self {
        Self {
            result: HostResult::Success,
            actual_length: length as u32,
            data: None,
        }
    }

    fn failed(error: rusb::Error) -> Self {
        debug!("Transfer failed: {}", error);
        Self {
            result: error.into(),
            actual_length: 0,
            data: None,
        }
    }

    fn from_read(result: rusb::Result<usize>, mut buffer: Vec<u8>) -> Self {
        match result {
            Ok(len) => {
                buffer.truncate(len);
                Self::received(buffer)
            }
            Err(err) => Self::failed(err),
        }
    }

    fn from_write(result: rusb::Result<usize>) -> Self {
        result.map_or_else(Self::failed, Self::sent)
    }

    fn from_request(result: rusb::Result<()>) -> Self {
        result.map_or_else(Self::failed, |()| Self::sent(0))
    }
}

/// An opened and claimed device.
///
/// Transfers share the handle through the read side of the lock, so a
/// long-running IN transfer on one endpoint never holds up the others.
/// Requests that change the device state take the write side.
struct OpenDevice {
    location: BusLocation,
    handle: RwLock<DeviceHandle<GlobalContext>>,
    claimed: Mutex<Vec<u8>>,
    endpoint_types: Mutex<HashMap<u8, TransferType>>,
}

impl OpenDevice {
    fn open(
        device: &rusb::Device<GlobalContext>,
        location: BusLocation,
    ) -> Result<(Self, DeviceDetails)> {
        let desc = device.device_descriptor()?;
        let config = device.active_config_descriptor()?;
        let mut handle = device.open()?;
        if let Err(err) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable for {:?}: {}", device, err);
        }
        let claimed = claim_interfaces(&mut handle, &config);

        let details = DeviceDetails {
            speed: device.speed().into(),
            device_bcd: desc.device_version().into(),
            device_class: desc.class_code(),
            device_subclass: desc.sub_class_code(),
            device_protocol: desc.protocol_code(),
            configuration_value: config.number(),
            num_configurations: desc.num_configurations(),
            // ignore alternate settings
            interfaces: config
                .interfaces()
                .filter_map(|interface| interface.descriptors().next())
                .map(|alt| UsbInterface::from(&alt))
                .collect(),
        };

        let device = Self {
            location,
            handle: RwLock::new(handle),
            claimed: Mutex::new(claimed),
            endpoint_types: Mutex::new(endpoint_types(&config)),
        };
        Ok((device, details))
    }

    fn control(
        &self,
        setup: &SetupPacket,
        out_data: &[u8],
        length: u32,
        timeout: Duration,
    ) -> Completion {
        // requests that change what the host stack knows about the device
        // go through libusb instead of straight to the device
        match (setup.standard_request(), setup.recipient()) {
            (Some(StandardRequest::SetConfiguration), Some(Recipient::Device)) => {
                return Completion::from_request(self.set_configuration(setup.value as u8));
            }
            (Some(StandardRequest::SetInterface), Some(Recipient::Interface)) => {
                let mut handle = write_lock(&self.handle);
                return Completion::from_request(
                    handle.set_alternate_setting(setup.index as u8, setup.value as u8),
                );
            }
            (Some(StandardRequest::ClearFeature), Some(Recipient::Endpoint))
                if setup.value == FEATURE_ENDPOINT_HALT =>
            {
                let mut handle = write_lock(&self.handle);
                return Completion::from_request(handle.clear_halt(setup.index as u8));
            }
            _ => {}
        }

        let handle = read_lock(&self.handle);
        match setup.direction() {
            Direction::In => {
                let mut buffer = vec![0; length as usize];
                let result = handle.read_control(
                    setup.request_type,
                    setup.request,
                    setup.value,
                    setup.index,
                    &mut buffer,
                    timeout,
                );
                Completion::from_read(result, buffer)
            }
            Direction::Out => Completion::from_write(handle.write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                out_data,
                timeout,
            )),
        }
    }

    fn transfer(
        &self,
        endpoint: EndpointIndex,
        out_data: &[u8],
        length: u32,
        timeout: Duration,
    ) -> Completion {
        let address = endpoint.address();
        let interrupt = lock(&self.endpoint_types)
            .get(&address)
            .map_or(false, |kind| *kind == TransferType::Interrupt);
        let handle = read_lock(&self.handle);
        match endpoint.direction() {
            Direction::In => {
                let mut buffer = vec![0; length as usize];
                let result = if interrupt {
                    handle.read_interrupt(address, &mut buffer, timeout)
                } else {
                    handle.read_bulk(address, &mut buffer, timeout)
                };
                Completion::from_read(result, buffer)
            }
            Direction::Out => Completion::from_write(if interrupt {
                handle.write_interrupt(address, out_data, timeout)
            } else {
                handle.write_bulk(address, out_data, timeout)
            }),
        }
    }

    fn set_configuration(&self, value: u8) -> rusb::Result<()> {
        let mut handle = write_lock(&self.handle);
        let mut claimed = lock(&self.claimed);
        for interface in claimed.drain(..) {
            handle.release_interface(interface).ok();
        }
        let result = handle.set_active_configuration(value);
        match handle.device().active_config_descriptor() {
            Ok(config) => {
                *claimed = claim_interfaces(&mut handle, &config);
                *lock(&self.endpoint_types) = endpoint_types(&config);
            }
            Err(err) => warn!("Failed to read configuration {}: {}", value, err),
        }
        result
    }

    /// Give the interfaces back to the kernel
    fn release(&self) {
        let mut handle = write_lock(&self.handle);
        for interface in lock(&self.claimed).drain(..) {
            if let Err(err) = handle.release_interface(interface) {
                debug!("Failed to release interface {}: {}", interface, err);
            }
        }
    }
}

#[derive(Default)]
struct OpenDevices {
    by_address: HashMap<DeviceAddress, Arc<OpenDevice>>,
    /// Devices that could not be opened, skipped until they go away
    ignored: HashSet<BusLocation>,
}

/// A [HostController] exporting the devices libusb can see
#[derive(Clone)]
pub struct LibusbHost {
    inner: Arc<LibusbInner>,
}

struct LibusbInner {
    settings: UsbSettings,
    filters: Vec<DeviceFilter>,
    max_devices: u8,
    sink: HostEventSink,
    runtime: Handle,
    devices: Mutex<OpenDevices>,
}

impl LibusbHost {
    /// Transfers run on `runtime`'s blocking pool and report to `sink`
    pub fn new(
        settings: &UsbSettings,
        max_devices: u8,
        sink: HostEventSink,
        runtime: Handle,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(LibusbInner {
                filters: settings.device_filters()?,
                settings: settings.clone(),
                max_devices,
                sink,
                runtime,
                devices: Mutex::new(OpenDevices::default()),
            }),
        })
    }

    fn device(&self, address: DeviceAddress) -> Option<Arc<OpenDevice>> {
        let device = lock(&self.inner.devices).by_address.get(&address).cloned();
        if device.is_none() {
            debug!("No open device at address {}", address);
        }
        device
    }

    /// Compare the bus against the open devices, mounting new ones and
    /// unmounting the ones that went away. Blocks on libusb.
    pub fn scan(&self) -> Result<()> {
        let found = scan_bus(&self.inner.filters)?;
        let present: HashSet<BusLocation> = found.iter().map(|(_, p)| p.location()).collect();

        let new_devices: Vec<_> = {
            let mut devices = lock(&self.inner.devices);
            devices.ignored.retain(|location| present.contains(location));

            let gone: Vec<DeviceAddress> = devices
                .by_address
                .iter()
                .filter(|(_, device)| !present.contains(&device.location))
                .map(|(address, _)| *address)
                .collect();
            for address in gone {
                if let Some(device) = devices.by_address.remove(&address) {
                    info!("Device {} at {:?} disconnected", address, device.location);
                    device.release();
                    self.inner.sink.device_unmounted(address);
                }
            }

            found
                .into_iter()
                .filter(|(_, p)| {
                    !devices.ignored.contains(&p.location())
                        && !devices.by_address.values().any(|d| d.location == p.location())
                })
                .collect()
        };

        for (device, found) in new_devices {
            let (open, details) = match OpenDevice::open(&device, found.location()) {
                Ok(opened) => opened,
                Err(err) => {
                    warn!("Impossible to share {}: {}, ignoring device", found, err);
                    lock(&self.inner.devices).ignored.insert(found.location());
                    continue;
                }
            };

            let mut devices = lock(&self.inner.devices);
            let free = (1..=self.inner.max_devices).find(|a| !devices.by_address.contains_key(a));
            let address = match free {
                Some(address) => address,
                None => {
                    warn!("No free device address for {}, ignoring device", found);
                    open.release();
                    devices.ignored.insert(found.location());
                    continue;
                }
            };
            info!("Exporting {} as device {}", found, address);
            devices.by_address.insert(address, Arc::new(open));
            self.inner
                .sink
                .device_mounted(address, found.vendor_id, found.product_id, details);
        }
        Ok(())
    }

    /// Rescan the bus forever at the configured interval
    pub async fn rescan_loop(self) {
        let mut interval = tokio::time::interval(self.inner.settings.rescan_interval());
        loop {
            interval.tick().await;
            let host = self.clone();
            match self.inner.runtime.spawn_blocking(move || host.scan()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("USB scan failed: {}", err),
                Err(err) => warn!("USB scan task failed: {}", err),
            }
        }
    }

    /// Release every device back to the kernel
    pub fn close(&self) {
        let devices = std::mem::take(&mut lock(&self.inner.devices).by_address);
        for (address, device) in devices {
            debug!("Releasing device {}", address);
            device.release();
        }
    }
}

impl HostController for LibusbHost {
    fn submit_control(
        &self,
        address: DeviceAddress,
        token: TransferToken,
        setup: [u8; 8],
        out_data: &[u8],
        length: u32,
    ) -> bool {
        let device = match self.device(address) {
            Some(device) => device,
            None => return false,
        };
        let setup = SetupPacket::parse(&setup);
        let endpoint = match EndpointIndex::new(0, setup.pipe_direction()) {
            Some(endpoint) => endpoint,
            None => return false,
        };
        debug!("To host device {}: setup={:?} data={:02x?}", address, setup, out_data);

        let out_data = out_data.to_vec();
        let timeout = self.inner.settings.control_timeout();
        let sink = self.inner.sink.clone();
        self.inner.runtime.spawn_blocking(move || {
            let completion = device.control(&setup, &out_data, length, timeout);
            sink.transfer_complete(
                address,
                endpoint,
                token,
                completion.result,
                completion.actual_length,
                completion.data,
            );
        });
        true
    }

    fn submit_bulk_or_interrupt(
        &self,
        address: DeviceAddress,
        endpoint: EndpointIndex,
        token: TransferToken,
        out_data: &[u8],
        length: u32,
    ) -> bool {
        let device = match self.device(address) {
            Some(device) => device,
            None => return false,
        };
        trace!(
            "To host device {}: ep={} length={} data={:02x?}",
            address,
            endpoint,
            length,
            out_data
        );

        let out_data = out_data.to_vec();
        let timeout = self.inner.settings.transfer_timeout();
        let sink = self.inner.sink.clone();
        self.inner.runtime.spawn_blocking(move || {
            let completion = device.transfer(endpoint, &out_data, length, timeout);
            sink.transfer_complete(
                address,
                endpoint,
                token,
                completion.result,
                completion.actual_length,
                completion.data,
            );
        });
        true
    }

    fn request_halt_clear(&self, address: DeviceAddress, endpoint: EndpointIndex) -> bool {
        if endpoint.is_ep0() {
            // the default pipe recovers by itself on the next SETUP
            return true;
        }
        let device = match self.device(address) {
            Some(device) => device,
            None => return false,
        };
        self.inner.runtime.spawn_blocking(move || {
            // a transfer still running on the device holds the handle
            match device.handle.try_write() {
                Ok(mut handle) => {
                    if let Err(err) = handle.clear_halt(endpoint.address()) {
                        debug!("Failed to clear halt on {}: {}", endpoint, err);
                    }
                }
                Err(_) => debug!("Device busy, not clearing halt on {}", endpoint),
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exportable_device_display() {
        let found = ExportableDevice {
            bus_number: 1,
            bus_address: 4,
            vendor_id: 0x1234,
            product_id: 0xABCD,
            speed: UsbSpeed::High,
            device_class: 0,
        };
        assert_eq!(
            found.to_string(),
            "Bus 001 Device 004: ID 1234:abcd (High speed, class 0x00)"
        );
    }

    #[test]
    fn completions() {
        assert_eq!(
            Completion::from_read(Ok(2), vec![1, 2, 3, 4]),
            Completion {
                result: HostResult::Success,
                actual_length: 2,
                data: Some(vec![1, 2]),
            }
        );
        assert_eq!(
            Completion::from_read(Err(rusb::Error::Pipe), vec![0; 8]),
            Completion {
                result: HostResult::Stalled,
                actual_length: 0,
                data: None,
            }
        );
        assert_eq!(Completion::from_write(Ok(64)).actual_length, 64);
        assert_eq!(
            Completion::from_write(Err(rusb::Error::Timeout)).result,
            HostResult::Timeout
        );
        assert_eq!(Completion::from_request(Ok(())), Completion::sent(0));
    }
}
