//! Host-thread side of the bridge

use std::sync::Arc;

use log::*;

use super::queue::{CommandQueue, PendingCommand};
use super::types::{RpcResponse, encode_response};
use crate::host::Host;

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was pending
    Idle,
    /// A command ran and its response was handed to the connection
    Responded,
    /// A notification ran, nothing to answer
    Silent,
    /// A command ran but its connection is gone
    SendFailed,
}

/// Runs queued commands against the host, one per tick.
///
/// Only call [`TickConsumer::tick`] from the host thread. It never blocks on
/// the network: sending only hands the response to the connection's thread.
#[derive(Debug, Clone)]
pub struct TickConsumer {
    queue: Arc<CommandQueue>,
}

impl TickConsumer {
    pub fn new(queue: Arc<CommandQueue>) -> Self {
        Self { queue }
    }

    /// Number of commands waiting for a tick
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Executes at most one pending command and sends its response
    pub fn tick<H: Host + ?Sized>(&self, host: &mut H) -> TickOutcome {
        let Some(PendingCommand {
            id,
            command,
            connection,
            frame_mode,
        }) = self.queue.pop_one()
        else {
            return TickOutcome::Idle;
        };

        let result = host.execute(&command);
        let response = match result {
            Ok(text) => {
                debug!("George command {:?} returned {:?}", command, text);
                RpcResponse::success(id, text)
            }
            Err(e) => {
                warn!("George command {:?} failed: {}", command, e);
                RpcResponse::server_error(id)
            }
        };

        if response.id.is_none() {
            return TickOutcome::Silent;
        }

        match connection.send(encode_response(&response), frame_mode) {
            Ok(()) => TickOutcome::Responded,
            Err(e) => {
                warn!("Dropping response to {:?}: {}", command, e);
                TickOutcome::SendFailed
            }
        }
    }
}
