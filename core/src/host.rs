//! Boundary to the host application's scripting engine

use thiserror::Error;

/// Host reported that a command could not be executed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExecutionFailure(pub String);

impl ExecutionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Events delivered by the host's callback dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Periodic timer tick (about every 20 ms)
    Tick,
    /// The inert window that keeps ticks enabled was closed
    RequesterClosed,
}

/// The host application, as seen from its own thread.
///
/// Implementations are only ever called from the host thread, inside the
/// periodic callback or the lifecycle hooks.
pub trait Host {
    /// Runs a George command synchronously and returns its textual result
    fn execute(&mut self, command: &str) -> Result<String, ExecutionFailure>;

    /// Makes sure the periodic callback keeps firing.
    ///
    /// Some hosts only tick while a window is open; those open a hidden one
    /// here.
    fn ensure_ticking(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
