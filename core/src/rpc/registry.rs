//! Live connection bookkeeping and per-connection send handles

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use log::*;
use thiserror::Error;
use tungstenite::Message;

use super::types::FrameMode;

pub type ConnectionId = u64;

/// Response could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendFailure {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Opaque handle used to target responses at one connection.
///
/// Sending only queues the frame for the connection's own thread, so it never
/// blocks on the network.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outgoing: Sender<Message>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outgoing: Sender<Message>) -> Self {
        Self { id, outgoing }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Best-effort send of an encoded payload
    pub fn send(&self, payload: String, frame_mode: FrameMode) -> Result<(), SendFailure> {
        self.outgoing
            .send(frame_mode.wrap(payload))
            .map_err(|_| SendFailure::Closed(self.id))
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    peer: SocketAddr,
    /// Second handle on the connection's socket, used to interrupt its thread
    socket: Option<TcpStream>,
    thread: Option<JoinHandle<()>>,
}

/// A connection taken out of the registry on shutdown
#[derive(Debug)]
pub struct ClosingConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    socket: Option<TcpStream>,
    thread: Option<JoinHandle<()>>,
}

impl ClosingConnection {
    /// Whether the connection's thread has returned
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Shuts the socket down so any blocked read or write returns at once
    pub fn abort(&self) {
        let Some(socket) = &self.socket else {
            return;
        };
        if let Err(e) = socket.shutdown(Shutdown::Both) {
            debug!("Connection {}: shutdown failed: {}", self.id, e);
        }
    }

    /// Waits for the connection's thread, returns false if it panicked
    pub fn join(self) -> bool {
        self.thread.is_none_or(|thread| thread.join().is_ok())
    }
}

/// Connections currently served by the endpoint
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<ConnectionId, ConnectionEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates an id for a freshly accepted connection.
    ///
    /// `socket` should be a clone of the connection's stream, so that
    /// [`ClosingConnection::abort`] can interrupt it.
    pub fn register(&self, peer: SocketAddr, socket: Option<TcpStream>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = ConnectionEntry {
            peer,
            socket,
            thread: None,
        };
        self.lock().insert(id, entry);
        id
    }

    /// Records the thread serving a connection.
    ///
    /// The thread may already have finished and unregistered itself, in which
    /// case the handle is simply dropped.
    pub fn attach(&self, id: ConnectionId, thread: JoinHandle<()>) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.thread = Some(thread);
        }
    }

    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empties the registry, handing back the connections to wind down
    pub fn take_all(&self) -> Vec<ClosingConnection> {
        let drained: Vec<_> = self.lock().drain().collect();
        drained
            .into_iter()
            .map(|(id, entry)| ClosingConnection {
                id,
                peer: entry.peer,
                socket: entry.socket,
                thread: entry.thread,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    #[test]
    fn handle_send_reaches_channel() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = ConnectionHandle::new(3, tx);
        handle.send("{}".to_string(), FrameMode::Binary).unwrap();
        let message = rx.try_recv().unwrap();
        assert!(message.is_binary());
        assert_eq!(&message.into_data()[..], b"{}");
    }

    #[test]
    fn handle_send_to_closed_connection_fails() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = ConnectionHandle::new(9, tx);
        drop(rx);
        assert_eq!(
            handle.send("{}".to_string(), FrameMode::Text),
            Err(SendFailure::Closed(9))
        );
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(peer(), None);
        let b = registry.register(peer(), None);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn attach_after_unregister_is_ignored() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(peer(), None);
        registry.unregister(id);
        registry.attach(id, std::thread::spawn(|| {}));
        assert!(registry.is_empty());
        assert!(registry.take_all().is_empty());
    }

    #[test]
    fn take_all_returns_connections() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(peer(), None);
        registry.attach(id, std::thread::spawn(|| {}));
        let idle = registry.register(peer(), None);

        let mut closing = registry.take_all();
        closing.sort_by_key(|c| c.id);
        assert_eq!(closing.len(), 2);
        assert_eq!(closing[0].id, id);
        assert_eq!(closing[0].peer, peer());
        assert_eq!(closing[1].id, idle);
        assert!(closing[1].is_finished());
        assert!(registry.is_empty());
        for connection in closing {
            assert!(connection.join());
        }
    }

    #[test]
    fn abort_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        let registry = ConnectionRegistry::new();
        let id = registry.register(peer, Some(stream.try_clone().unwrap()));
        let reader = std::thread::spawn(move || {
            let mut stream = stream;
            let mut buf = [0u8; 16];
            // Blocks until the socket is shut down, the client never writes
            stream.read(&mut buf)
        });
        registry.attach(id, std::thread::spawn(move || drop(reader.join())));

        let closing = registry.take_all();
        assert_eq!(closing.len(), 1);
        assert!(!closing[0].is_finished());
        let started = Instant::now();
        for connection in &closing {
            connection.abort();
        }
        for connection in closing {
            assert!(connection.join());
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
