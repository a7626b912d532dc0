use std::net::TcpListener;

use super::*;
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::host::HostEvent;
use crate::rpc::TickOutcome;

fn bridge_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        server: RpcConfig {
            port,
            ..Default::default()
        },
        log_dir: None,
        invalid: Vec::new(),
    }
}

#[test]
fn lifecycle() {
    let mut host = ScriptedHost::new().returns("tv_version", "v12.0");
    let mut bridge = Bridge::open(&bridge_config(0), &mut host);
    assert!(bridge.is_serving());
    assert!(bridge.is_ticking());
    assert_eq!(host.tick_requests, 1);

    let server = bridge.server().unwrap();
    let mut client = connect(server.local_addr().unwrap());
    send_text(&mut client, &request(1, "tv_version"));
    wait_for(|| server.queue_len() == 1);

    assert_eq!(
        bridge.on_event(HostEvent::Tick, &mut host),
        TickOutcome::Responded
    );
    assert_eq!(read_json(&mut client).0["result"], "v12.0");

    bridge.close();
    assert!(!bridge.is_serving());
    assert_eq!(bridge.on_event(HostEvent::Tick, &mut host), TickOutcome::Idle);
    bridge.close();
}

#[test]
fn requester_closed_and_reopened() {
    let mut host = ScriptedHost::new();
    let mut bridge = Bridge::open(&bridge_config(0), &mut host);

    bridge.on_event(HostEvent::RequesterClosed, &mut host);
    assert!(!bridge.is_ticking());

    bridge.ensure_ticking(&mut host);
    assert!(bridge.is_ticking());
    assert_eq!(host.tick_requests, 2);
}

#[test]
fn degraded_when_port_is_taken() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let mut host = ScriptedHost::new();
    let bridge = Bridge::open(&bridge_config(port), &mut host);
    assert!(!bridge.is_serving());
    assert!(bridge.server().is_none());
    assert!(bridge.is_ticking());
    assert_eq!(bridge.tick(&mut host), TickOutcome::Idle);
    assert!(host.executed.is_empty());
}
