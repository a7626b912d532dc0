//! Plugin lifecycle glue between the host hooks and the RPC server

use log::*;

use crate::config::BridgeConfig;
use crate::host::{Host, HostEvent};
use crate::logging;
use crate::rpc::{RpcServer, TickConsumer, TickOutcome};

/// One bridge instance per loaded plugin.
///
/// Created by the host's open hook, driven by its event callback and torn
/// down by its close hook (or on drop).
pub struct Bridge {
    server: Option<RpcServer>,
    consumer: Option<TickConsumer>,
    ticking: bool,
}

impl Bridge {
    /// Name the plugin registers under
    pub const NAME: &'static str = "George WebSocket server";
    pub const VERSION: u32 = 1;
    pub const REVISION: u32 = 0;

    /// Open hook: sets up logging, starts the server and enables ticks.
    ///
    /// A server that cannot bind is logged and left out; the bridge then stays
    /// loaded but inert.
    pub fn open<H: Host + ?Sized>(config: &BridgeConfig, host: &mut H) -> Self {
        logging::init(config.log_dir.as_deref());
        config.report_invalid();
        info!("{} {}.{} starting", Self::NAME, Self::VERSION, Self::REVISION);

        let mut server = RpcServer::new(config.server.clone());
        let server = match server.start() {
            Ok(_) => Some(server),
            Err(e) => {
                error!("{}", e);
                None
            }
        };

        let mut bridge = Self {
            consumer: server.as_ref().map(RpcServer::consumer),
            server,
            ticking: false,
        };
        bridge.ensure_ticking(host);
        bridge
    }

    /// Asks the host to (re-)enable the periodic callback
    pub fn ensure_ticking<H: Host + ?Sized>(&mut self, host: &mut H) {
        match host.ensure_ticking() {
            Ok(()) => self.ticking = true,
            Err(e) => error!("Cannot enable host ticks: {:#}", e),
        }
    }

    /// Event callback body
    pub fn on_event<H: Host + ?Sized>(&mut self, event: HostEvent, host: &mut H) -> TickOutcome {
        match event {
            HostEvent::Tick => self.tick(host),
            HostEvent::RequesterClosed => {
                warn!("Tick requester closed, queued commands wait until ticks resume");
                self.ticking = false;
                TickOutcome::Idle
            }
        }
    }

    /// Runs at most one pending command
    pub fn tick<H: Host + ?Sized>(&self, host: &mut H) -> TickOutcome {
        self.consumer
            .as_ref()
            .map_or(TickOutcome::Idle, |consumer| consumer.tick(host))
    }

    pub fn is_serving(&self) -> bool {
        self.server.as_ref().is_some_and(RpcServer::is_running)
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn server(&self) -> Option<&RpcServer> {
        self.server.as_ref()
    }

    /// Close hook: stops the server, pending commands are dropped unexecuted
    pub fn close(&mut self) {
        self.consumer = None;
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.close();
    }
}
