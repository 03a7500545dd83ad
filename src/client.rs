use super::*;
use tokio::sync::mpsc;

/// Identifies one TCP session for the lifetime of a server.
///
/// Handles are never reused, so a stale handle can not name a newer session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Protocol state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unattached,
    Attached,
    Closed,
}

/// Messages queued for the writer half of a connection
#[derive(Debug, PartialEq, Eq)]
pub enum SessionMessage {
    Response(Vec<u8>),
    /// Stop writing and drop the connection
    Close,
}

/// What the listener knows about a freshly accepted connection
#[derive(Debug)]
pub struct ClientConnection {
    pub peer: SocketAddr,
    pub outbound: mpsc::UnboundedSender<SessionMessage>,
}

impl ClientConnection {
    /// Creates a connection together with the receiving end of its queue
    pub fn new(peer: SocketAddr) -> (Self, mpsc::UnboundedReceiver<SessionMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { peer, outbound }, rx)
    }
}

#[derive(Debug)]
pub struct ClientSession {
    pub handle: SessionHandle,
    pub peer: SocketAddr,
    pub state: SessionState,
    pub attached_device: Option<DeviceAddress>,
    /// Bytes received but not yet parsed into a complete command
    pub recv_buffer: Vec<u8>,
    outbound: mpsc::UnboundedSender<SessionMessage>,
}

impl ClientSession {
    /// Queue a response; returns `false` if the connection is already gone
    pub fn send(&self, response: Vec<u8>) -> bool {
        trace!("[{}] Staging response: {:02x?}", self.handle, response);
        if self.outbound.send(SessionMessage::Response(response)).is_err() {
            debug!("[{}] Dropping response, writer is gone", self.handle);
            return false;
        }
        true
    }

    /// Ask the writer to drop the connection after the queued responses
    pub fn close(&self) {
        self.outbound.send(SessionMessage::Close).ok();
    }

    /// Forget the imported device and return to `Unattached`
    pub fn detach(&mut self) -> Option<DeviceAddress> {
        if self.state != SessionState::Closed {
            self.state = SessionState::Unattached;
        }
        self.attached_device.take()
    }
}

/// Active TCP sessions
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: HashMap<SessionHandle, ClientSession>,
    next_handle: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, connection: ClientConnection) -> SessionHandle {
        self.next_handle += 1;
        let handle = SessionHandle(self.next_handle);
        debug!("Added client {} from {}", handle, connection.peer);
        self.sessions.insert(
            handle,
            ClientSession {
                handle,
                peer: connection.peer,
                state: SessionState::Unattached,
                attached_device: None,
                recv_buffer: vec![],
                outbound: connection.outbound,
            },
        );
        handle
    }

    /// Forget a session. Callers cascade the removal to devices and transfers.
    pub fn remove(&mut self, handle: SessionHandle) -> Option<ClientSession> {
        let mut session = self.sessions.remove(&handle)?;
        session.state = SessionState::Closed;
        debug!("Removed client {} from {}", handle, session.peer);
        Some(session)
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&ClientSession> {
        self.sessions.get(&handle)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&handle)
    }

    /// The session that has imported `address`, if any
    pub fn find_by_device(&self, address: DeviceAddress) -> Option<SessionHandle> {
        self.sessions
            .values()
            .find(|session| session.attached_device == Some(address))
            .map(|session| session.handle)
    }

    pub fn list(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::tests::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn handles_are_not_reused() {
        setup_test_logger();
        let mut registry = ClientRegistry::new();
        let (connection, _rx) = ClientConnection::new(peer());
        let first = registry.add(connection);
        registry.remove(first);
        let (connection, _rx) = ClientConnection::new(peer());
        let second = registry.add(connection);
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
    }

    #[test]
    fn find_by_device() {
        setup_test_logger();
        let mut registry = ClientRegistry::new();
        let (connection, _rx) = ClientConnection::new(peer());
        let idle = registry.add(connection);
        let (connection, _rx) = ClientConnection::new(peer());
        let importer = registry.add(connection);
        registry.get_mut(importer).unwrap().attached_device = Some(3);

        assert_eq!(registry.find_by_device(3), Some(importer));
        assert_eq!(registry.find_by_device(4), None);
        assert_eq!(registry.get(idle).unwrap().attached_device, None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removed_session_is_closed() {
        setup_test_logger();
        let mut registry = ClientRegistry::new();
        let (connection, _rx) = ClientConnection::new(peer());
        let handle = registry.add(connection);
        let session = registry.remove(handle).unwrap();
        assert_eq!(session.state, SessionState::Closed);
        assert!(registry.is_empty());
        assert!(registry.remove(handle).is_none());
    }

    #[test]
    fn responses_reach_the_writer_queue() {
        setup_test_logger();
        let mut registry = ClientRegistry::new();
        let (connection, mut rx) = ClientConnection::new(peer());
        let handle = registry.add(connection);
        let session = registry.get(handle).unwrap();
        assert!(session.send(vec![1, 2, 3]));
        session.close();
        assert_eq!(rx.try_recv().unwrap(), SessionMessage::Response(vec![1, 2, 3]));
        assert_eq!(rx.try_recv().unwrap(), SessionMessage::Close);

        drop(rx);
        assert!(!registry.get(handle).unwrap().send(vec![4]));
    }
}
