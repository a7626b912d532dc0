//! Runs the George WebSocket bridge against a simulated host
//!
//! Useful to try clients without the real application: the main thread plays
//! the host and fires the tick callback at a fixed cadence.

mod host;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use log::*;

use georgews_core::bridge::Bridge;
use georgews_core::config::BridgeConfig;
use georgews_core::host::HostEvent;
use georgews_core::logging;
use georgews_core::rpc::TickOutcome;

use crate::host::SimHost;

#[derive(Parser)]
#[command(name = "georgews-sim")]
#[command(about = "George WebSocket server on a simulated host", long_about = None)]
struct Args {
    /// Listen port (overrides TVP_RPC_WS_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Tick interval in milliseconds
    #[arg(long, default_value_t = 20)]
    tick_ms: u64,

    /// Stop after this many seconds instead of running forever
    #[arg(long)]
    duration: Option<u64>,

    /// Canvas width reported by the host
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Canvas height reported by the host
    #[arg(long, default_value_t = 1080)]
    height: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BridgeConfig::from_env();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    logging::init(config.log_dir.as_deref());

    let mut host = SimHost::new(args.width, args.height);
    let mut bridge = Bridge::open(&config, &mut host);
    if !bridge.is_serving() {
        bail!("WebSocket server failed to start");
    }

    let tick = Duration::from_millis(args.tick_ms);
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut executed = 0u64;

    while deadline.is_none_or(|deadline| Instant::now() < deadline) {
        let started = Instant::now();
        if bridge.on_event(HostEvent::Tick, &mut host) != TickOutcome::Idle {
            executed += 1;
        }
        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    bridge.close();
    info!("Executed {} command(s)", executed);
    Ok(())
}
