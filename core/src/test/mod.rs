//! Shared fixtures for end-to-end tests against a real server

mod bridge;

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tungstenite::{Message, WebSocket};

use crate::host::{ExecutionFailure, Host};
use crate::rpc::{RpcConfig, RpcServer};

/// Host double that records what it ran and answers from a script
#[derive(Default)]
pub struct ScriptedHost {
    pub executed: Vec<String>,
    pub tick_requests: usize,
    script: HashMap<String, Result<String, ExecutionFailure>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returns(mut self, command: &str, result: &str) -> Self {
        self.script
            .insert(command.to_string(), Ok(result.to_string()));
        self
    }

    pub fn fails(mut self, command: &str) -> Self {
        self.script.insert(
            command.to_string(),
            Err(ExecutionFailure::new("scripted failure")),
        );
        self
    }
}

impl Host for ScriptedHost {
    fn execute(&mut self, command: &str) -> Result<String, ExecutionFailure> {
        self.executed.push(command.to_string());
        self.script
            .get(command)
            .cloned()
            .unwrap_or_else(|| Ok(format!("ok:{command}")))
    }

    fn ensure_ticking(&mut self) -> anyhow::Result<()> {
        self.tick_requests += 1;
        Ok(())
    }
}

pub type Client = WebSocket<TcpStream>;

pub fn test_config() -> RpcConfig {
    RpcConfig {
        port: 0,
        ..Default::default()
    }
}

pub fn start_server(config: RpcConfig) -> (RpcServer, SocketAddr) {
    let mut server = RpcServer::new(config);
    let addr = server.start().unwrap();
    (server, addr)
}

pub fn connect(addr: SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let (client, _) = tungstenite::client(format!("ws://{addr}/"), stream)
        .unwrap_or_else(|e| panic!("handshake failed: {e}"));
    client
}

pub fn request(id: u64, command: &str) -> String {
    format!(r#"{{"jsonrpc":"2.0","method":"execute_george","params":["{command}"],"id":{id}}}"#)
}

pub fn notification(command: &str) -> String {
    format!(r#"{{"jsonrpc":"2.0","method":"execute_george","params":["{command}"]}}"#)
}

pub fn send_text(client: &mut Client, payload: &str) {
    client.send(Message::text(payload)).unwrap();
}

/// Next data frame as parsed JSON, with its frame mode
pub fn read_json(client: &mut Client) -> (serde_json::Value, bool) {
    loop {
        match client.read().unwrap() {
            Message::Text(text) => return (serde_json::from_str(&text).unwrap(), false),
            Message::Binary(data) => return (serde_json::from_slice(&data).unwrap(), true),
            _ => {}
        }
    }
}

/// Asserts nothing else arrives for a short while
pub fn assert_silent(client: &mut Client) {
    client
        .get_ref()
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    match client.read() {
        Err(tungstenite::Error::Io(e)) if is_idle(&e) => {}
        other => panic!("expected silence, got {other:?}"),
    }
}

fn is_idle(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}
