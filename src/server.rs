//! USB/IP server
//!
//! All bookkeeping lives in one [ServerState] behind a single lock. Both the
//! per-connection tasks and the host event task go through it, and nothing
//! awaits while holding it.
mod engine;
mod listener;

use super::*;
use crate::host::{HostController, HostEvent, HostEventReceiver};
use crate::usbip_protocol::{Decoded, UsbIpCommand};
use crate::util::lock;
use engine::Engine;
use std::sync::{Arc, Mutex};

/// The registries a server owns
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) devices: DeviceRegistry,
    pub(crate) clients: ClientRegistry,
    pub(crate) transfers: TransferTable,
}

impl ServerState {
    fn new(max_devices: u8) -> Self {
        Self {
            devices: DeviceRegistry::new(max_devices),
            clients: ClientRegistry::new(),
            transfers: TransferTable::new(max_devices),
        }
    }

    /// Forget a session together with its transfers and its import
    pub(crate) fn remove_session(&mut self, handle: SessionHandle) -> Option<ClientSession> {
        let drained = self.transfers.drain_for_session(handle);
        let session = self.clients.remove(handle)?;
        if let Some(address) = session.attached_device {
            if let Some(device) = self.devices.find_mut(address) {
                device.attached = false;
            }
        }
        debug!(
            "[{}] Session removed, {} pending transfers discarded",
            handle, drained
        );
        Some(session)
    }

    /// Forget a device, discarding its transfers and dropping its importer.
    ///
    /// The importer's connection is closed once its queued responses are out.
    pub(crate) fn remove_device(&mut self, address: DeviceAddress) -> Option<HostDevice> {
        let drained = self.transfers.drain_for_device(address);
        if let Some(handle) = self.clients.find_by_device(address) {
            if let Some(session) = self.clients.get_mut(handle) {
                warn!("[{}] Imported device {} went away, closing", handle, address);
                session.detach();
                session.close();
            }
        }
        let device = self.devices.remove(address)?;
        debug!(
            "Device {} removed, {} pending transfers discarded",
            address, drained
        );
        Some(device)
    }
}

/// A USB/IP server.
///
/// A server that exposes the devices of a USB host stack to clients,
/// using the USB/IP protocol.
#[derive(Clone)]
pub struct UsbIpServer {
    config: Arc<ServerConfig>,
    host: Arc<dyn HostController>,
    state: Arc<Mutex<ServerState>>,
}

impl UsbIpServer {
    /// Create a [UsbIpServer] forwarding transfers to `host`
    pub fn new(config: ServerConfig, host: Arc<dyn HostController>) -> Self {
        let state = ServerState::new(config.max_devices);
        Self {
            config: Arc::new(config),
            host,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Devices currently known to the server
    pub fn devices(&self) -> Vec<HostDevice> {
        lock(&self.state).devices.list().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.state).clients.len()
    }

    pub fn pending_transfers(&self) -> usize {
        lock(&self.state).transfers.len()
    }

    /// Start tracking a freshly accepted connection
    pub fn register_client(&self, connection: ClientConnection) -> SessionHandle {
        let peer = connection.peer;
        let handle = lock(&self.state).clients.add(connection);
        info!("[{}] New session from {}", handle, peer);
        handle
    }

    /// Feed bytes read from a session's socket.
    ///
    /// Every complete command is handled in order; an incomplete tail stays
    /// buffered. An error means the stream is broken and the connection must
    /// be closed; commands before the broken one have been handled.
    pub fn on_bytes_received(&self, handle: SessionHandle, bytes: &[u8]) -> Result<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let session = state
            .clients
            .get_mut(handle)
            .ok_or(Error::UnknownSession(handle))?;
        session.recv_buffer.extend_from_slice(bytes);

        let mut commands = vec![];
        let mut offset = 0;
        let framing = loop {
            match UsbIpCommand::decode(&session.recv_buffer[offset..]) {
                Ok(Decoded::Complete { value, consumed }) => {
                    commands.push(value);
                    offset += consumed;
                }
                Ok(Decoded::NeedMoreBytes(n)) => {
                    trace!(
                        "[{}] Waiting for {} bytes, have {}",
                        handle,
                        n,
                        session.recv_buffer.len() - offset
                    );
                    break Ok(());
                }
                Err(err) => break Err(err),
            }
        };
        session.recv_buffer.drain(..offset);

        let mut engine = Engine::new(state, self.host.as_ref(), self.config.bus_number);
        for command in commands {
            engine.dispatch(handle, command);
        }

        framing.map_err(|err| {
            warn!("[{}] Framing error: {}", handle, err);
            err.into()
        })
    }

    /// Tear down a session after its connection ended
    pub fn close_session(&self, handle: SessionHandle) {
        if let Some(session) = lock(&self.state).remove_session(handle) {
            info!("[{}] Session from {} closed", handle, session.peer);
        }
    }

    /// Apply one event reported by the host stack
    pub fn handle_host_event(&self, event: HostEvent) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        match event {
            HostEvent::DeviceMounted {
                address,
                vendor_id,
                product_id,
                details,
            } => {
                if state
                    .devices
                    .add_with_details(address, vendor_id, product_id, details)
                {
                    info!(
                        "Device {} ({:04x}:{:04x}) available as {}-{}",
                        address, vendor_id, product_id, self.config.bus_number, address
                    );
                }
            }
            HostEvent::DeviceUnmounted { address } => {
                if state.remove_device(address).is_some() {
                    info!("Device {} unmounted", address);
                }
            }
            HostEvent::TransferComplete {
                address,
                endpoint,
                token,
                result,
                actual_length,
                data,
            } => {
                let mut engine = Engine::new(state, self.host.as_ref(), self.config.bus_number);
                engine.complete_transfer(address, endpoint, token, result, actual_length, data);
            }
        }
    }

    /// Apply host events until every sink is gone
    pub async fn process_host_events(self, mut events: HostEventReceiver) {
        while let Some(event) = events.recv().await {
            self.handle_host_event(event);
        }
        debug!("Host event channel closed");
    }

    /// Close every session and forget all devices and transfers
    pub fn shutdown(&self) {
        let mut state = lock(&self.state);
        for handle in state.clients.handles() {
            if let Some(session) = state.remove_session(handle) {
                session.close();
            }
        }
        state.transfers.clear();
        state.devices.clear();
        info!("Server shut down");
    }
}
