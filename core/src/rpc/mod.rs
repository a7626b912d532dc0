//! JSON-RPC bridge between WebSocket clients and the host thread
//!
//! This module provides a JSON-RPC 2.0 interface over WebSocket (text or binary
//! frames) for external processes to run George commands inside the host.
//!
//! Requests are decoded on per-connection threads and queued. The host drives
//! a [`TickConsumer`] from its periodic callback, which executes one queued
//! command per tick and sends the response back to the originating connection
//! in the frame mode the request used.
//!
//! # Example
//!
//! ```bash
//! echo '{"jsonrpc":"2.0","method":"execute_george","params":["tv_version"],"id":1}' \
//!     | websocat ws://127.0.0.1:3000
//! ```

mod consumer;
mod queue;
mod registry;
mod server;
mod types;

pub use consumer::{TickConsumer, TickOutcome};
pub use queue::{CommandQueue, OverflowPolicy, PendingCommand, PushOutcome};
pub use registry::{
    ClosingConnection, ConnectionHandle, ConnectionId, ConnectionRegistry, SendFailure,
};
pub use server::{
    DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, RpcConfig, RpcServer, ServerError, handle_frame,
};
pub use types::*;
