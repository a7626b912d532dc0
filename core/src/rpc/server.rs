//! RPC server implementation
//!
//! Accepts WebSocket connections and decodes JSON-RPC 2.0 requests on
//! per-connection threads. Valid requests are pushed onto the command queue;
//! responses produced on the host thread come back through each connection's
//! outgoing channel and are written by that connection's thread.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use crossbeam_channel::Receiver;
use log::*;
use thiserror::Error;
use tungstenite::{Error as WsError, Message, WebSocket};

use super::consumer::TickConsumer;
use super::queue::{CommandQueue, OverflowPolicy, PendingCommand, PushOutcome};
use super::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use super::types::{FrameMode, RpcResponse, decode_request, encode_response};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Address to listen on
    pub host: IpAddr,
    /// TCP port to listen on (0 picks a free port)
    pub port: u16,
    /// Maximum number of pending commands, 0 for unbounded
    pub queue_capacity: usize,
    /// What to do when the queue is full
    pub overflow_policy: OverflowPolicy,
    /// How often idle connection threads check for responses and shutdown
    pub poll_interval: Duration,
    /// Longest silence allowed during the WebSocket opening handshake
    pub handshake_timeout: Duration,
    /// Time allowed for the closing handshake on shutdown
    pub close_timeout: Duration,
    /// Time allowed for a single blocked write
    pub write_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            poll_interval: Duration::from_millis(10),
            handshake_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl RpcConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind WebSocket server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server was already started")]
    AlreadyStarted,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// State shared between the server handle and its threads
#[derive(Debug)]
struct Shared {
    config: RpcConfig,
    running: AtomicBool,
    queue: Arc<CommandQueue>,
    registry: ConnectionRegistry,
}

/// WebSocket server that listens for connections and queues requests
pub struct RpcServer {
    shared: Arc<Shared>,
    started: bool,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RpcServer {
    /// Creates a new RPC server with the given configuration
    pub fn new(config: RpcConfig) -> Self {
        let capacity = Some(config.queue_capacity);
        let queue = Arc::new(CommandQueue::new(capacity, config.overflow_policy));
        Self {
            shared: Arc::new(Shared {
                config,
                running: AtomicBool::new(false),
                queue,
                registry: ConnectionRegistry::new(),
            }),
            started: false,
            local_addr: None,
            accept_thread: None,
        }
    }

    /// Returns the consumer to be driven by the host's periodic callback
    pub fn consumer(&self) -> TickConsumer {
        TickConsumer::new(self.shared.queue.clone())
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Can only be called once per server, even if binding failed.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.started {
            return Err(ServerError::AlreadyStarted);
        }
        self.started = true;

        let addr = self.shared.config.addr();
        let listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let accept_thread = thread::Builder::new()
            .name("georgews-accept".to_string())
            .spawn(move || Self::accept_loop(&listener, &shared))
            .inspect_err(|_| self.shared.running.store(false, Ordering::SeqCst))?;

        let queue = &self.shared.queue;
        info!(
            "WebSocket server listening on ws://{} (queue capacity {}, {} when full)",
            local_addr,
            queue
                .capacity()
                .map_or_else(|| "unbounded".to_string(), |c| c.to_string()),
            queue.policy()
        );
        self.accept_thread = Some(accept_thread);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stops the server: closes all connections and discards pending commands.
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }

        self.close_connections();

        let discarded = self.shared.queue.clear();
        if discarded > 0 {
            info!("Discarded {} pending command(s) on shutdown", discarded);
        }
        info!("WebSocket server stopped");
    }

    /// Winds down every connection within a bounded time.
    ///
    /// Idle connection threads notice the stopped flag within one poll
    /// interval and then spend at most the close timeout on the closing
    /// handshake. Threads still busy after that (a peer trickling a handshake
    /// or a frame byte by byte) get their socket shut down under them.
    fn close_connections(&self) {
        let config = &self.shared.config;
        let connections = self.shared.registry.take_all();

        let deadline = Instant::now() + config.close_timeout + config.poll_interval * 2;
        while Instant::now() < deadline && connections.iter().any(|c| !c.is_finished()) {
            thread::sleep(config.poll_interval);
        }

        for connection in connections {
            if !connection.is_finished() {
                warn!(
                    "Connection {} from {} did not close in time, dropping it",
                    connection.id, connection.peer
                );
                connection.abort();
            }
            let id = connection.id;
            if !connection.join() {
                warn!("Connection {} thread panicked", id);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    fn accept_loop(listener: &TcpListener, shared: &Arc<Shared>) {
        while shared.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => Self::spawn_connection(stream, peer, shared),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(shared.config.poll_interval);
                }
                Err(e) => {
                    error!("WebSocket accept error: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
        debug!("Accept loop finished");
    }

    fn spawn_connection(stream: TcpStream, peer: SocketAddr, shared: &Arc<Shared>) {
        let socket = stream
            .try_clone()
            .inspect_err(|e| warn!("Cannot clone socket of {}: {}", peer, e))
            .ok();
        let id = shared.registry.register(peer, socket);
        debug!("Connection {} from {}", id, peer);

        let thread_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("georgews-conn-{}", id))
            .spawn(move || {
                if let Err(e) = Self::handle_connection(stream, id, &thread_shared) {
                    debug!("Connection {} error: {:#}", id, e);
                }
                thread_shared.registry.unregister(id);
                debug!("Connection {} from {} closed", id, peer);
            });

        match spawned {
            Ok(thread) => shared.registry.attach(id, thread),
            Err(e) => {
                error!("Cannot spawn thread for connection {}: {}", id, e);
                shared.registry.unregister(id);
            }
        }
    }

    fn handle_connection(
        stream: TcpStream,
        id: ConnectionId,
        shared: &Shared,
    ) -> anyhow::Result<()> {
        let config = &shared.config;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.handshake_timeout))?;
        stream.set_write_timeout(Some(config.write_timeout))?;

        let mut websocket = tungstenite::accept(stream)
            .map_err(|e| anyhow!("WebSocket handshake failed: {}", e))?;
        websocket
            .get_ref()
            .set_read_timeout(Some(config.poll_interval))
            .context("Cannot set poll interval")?;

        let (outgoing_tx, outgoing_rx) = crossbeam_channel::unbounded();
        let handle = ConnectionHandle::new(id, outgoing_tx);

        while shared.running.load(Ordering::SeqCst) {
            Self::flush_outgoing(&mut websocket, &outgoing_rx)?;

            let (payload, frame_mode) = match websocket.read() {
                Ok(Message::Text(text)) => (text.as_bytes().to_vec(), FrameMode::Text),
                Ok(Message::Binary(data)) => (data.to_vec(), FrameMode::Binary),
                // Pings are answered by tungstenite on the next flush, close
                // frames surface as ConnectionClosed on the next read
                Ok(_) => continue,
                Err(WsError::Io(ref e)) if is_timeout(e) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            if let Some(reply) = handle_frame(&shared.queue, &handle, &payload, frame_mode) {
                websocket.send(reply)?;
            }
        }

        Self::close_gracefully(&mut websocket, config.close_timeout);
        Ok(())
    }

    /// Writes the responses the host thread produced since the last poll
    fn flush_outgoing(
        websocket: &mut WebSocket<TcpStream>,
        outgoing: &Receiver<Message>,
    ) -> Result<(), WsError> {
        for message in outgoing.try_iter() {
            websocket.write(message)?;
        }
        websocket.flush()
    }

    fn close_gracefully(websocket: &mut WebSocket<TcpStream>, timeout: Duration) {
        if websocket.close(None).is_err() {
            return;
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match websocket.read() {
                Ok(_) => {}
                Err(WsError::Io(ref e)) if is_timeout(e) => {}
                Err(_) => return,
            }
        }
        debug!("Closing handshake timed out");
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Handles one data frame received on a connection.
///
/// Valid execute requests are queued. Anything that must be answered without
/// going through the host (malformed input, unknown methods, bad params, a
/// full queue) yields an immediate reply in the request's frame mode.
pub fn handle_frame(
    queue: &CommandQueue,
    connection: &ConnectionHandle,
    payload: &[u8],
    frame_mode: FrameMode,
) -> Option<Message> {
    let request = match decode_request(payload) {
        Ok(request) => request,
        Err(e) => {
            debug!(
                "Connection {}: rejected frame ({}): {}",
                connection.id(),
                e.code(),
                e
            );
            return Some(frame_mode.wrap(encode_response(&e.to_response())));
        }
    };

    let command = match request.command() {
        Ok(command) => command,
        Err(e) => {
            debug!(
                "Connection {}: cannot call {:?}: {}",
                connection.id(),
                request.method,
                e
            );
            return request
                .id
                .map(|id| frame_mode.wrap(encode_response(&e.to_response(Some(id)))));
        }
    };

    trace!("Connection {}: queueing {:?}", connection.id(), command);
    let pending = PendingCommand {
        id: request.id,
        command,
        connection: connection.clone(),
        frame_mode,
    };

    match queue.push(pending) {
        PushOutcome::Queued => None,
        PushOutcome::Rejected(rejected) => {
            warn!(
                "Command queue full, rejecting {:?} from connection {}",
                rejected.command,
                connection.id()
            );
            rejected
                .id
                .map(|id| frame_mode.wrap(encode_response(&RpcResponse::server_busy(Some(id)))))
        }
        PushOutcome::Displaced(displaced) => {
            warn!(
                "Command queue full, dropping oldest command {:?} from connection {}",
                displaced.command,
                displaced.connection.id()
            );
            answer_busy(&displaced);
            None
        }
    }
}

fn answer_busy(displaced: &PendingCommand) {
    let Some(id) = displaced.id.clone() else {
        return;
    };
    let payload = encode_response(&RpcResponse::server_busy(Some(id)));
    if let Err(e) = displaced.connection.send(payload, displaced.frame_mode) {
        debug!("Busy reply not delivered: {}", e);
    }
}
