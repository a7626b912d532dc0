//! George RPC Command Line Interface
//!
//! A small client for running George commands through the WebSocket server.

use std::io::{self, BufRead};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tungstenite::{Message, WebSocket};

const DEFAULT_PORT: u16 = 3000;

#[derive(Parser)]
#[command(name = "george-rpc")]
#[command(about = "George WebSocket server command line client", long_about = None)]
#[command(after_help = r#"EXAMPLES:
    george-rpc version                        Print the host version
    george-rpc exec tv_getwidth               Run a George command
    george-rpc exec tv_setname "My project"   Arguments are joined with spaces
    george-rpc --binary exec tv_version       Use binary frames
    george-rpc repl < script.grg              Run one command per input line
    george-rpc raw exec '{"command":"tv_version"}'
"#)]
struct Cli {
    /// Server address
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Server port (defaults to $TVP_RPC_WS_PORT, then 3000)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Send requests as binary frames
    #[arg(short, long, global = true)]
    binary: bool,

    /// Print raw JSON-RPC responses
    #[arg(short, long, global = true)]
    json: bool,

    /// Seconds to wait for each response
    #[arg(short, long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a George command
    Exec {
        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Print the host version
    Version,

    /// Execute George commands read from stdin, one per line
    Repl,

    /// Send raw RPC method
    Raw {
        /// RPC method name
        method: String,

        /// JSON parameters
        params: Option<String>,
    },
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
    #[serde(default)]
    id: Value,
}

#[derive(Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn into_result(self) -> Result<String> {
        if let Some(error) = self.error {
            bail!("RPC error {}: {}", error.code, error.message);
        }
        self.result.ok_or_else(|| anyhow!("No result in response"))
    }
}

struct Client {
    socket: WebSocket<TcpStream>,
    binary: bool,
    next_id: u64,
}

impl Client {
    fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream =
            TcpStream::connect(&addr).with_context(|| format!("Failed to connect to: {}", addr))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let (socket, _) = tungstenite::client(format!("ws://{}/", addr), stream)
            .map_err(|e| anyhow!("WebSocket handshake with {} failed: {}", addr, e))?;

        Ok(Self {
            socket,
            binary: false,
            next_id: 1,
        })
    }

    /// Sends a request and waits for its response, returning the raw JSON too
    fn call(&mut self, method: &str, params: Value) -> Result<(String, RpcResponse)> {
        let id = self.next_id;
        self.next_id += 1;

        let request = serde_json::to_string(&RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        })?;
        debug!("-> {}", request);

        let message = if self.binary {
            Message::binary(request.into_bytes())
        } else {
            Message::text(request)
        };
        self.socket.send(message)?;

        loop {
            let raw = match self.socket.read().context("No response from server")? {
                Message::Text(text) => text.as_str().to_string(),
                Message::Binary(data) => {
                    String::from_utf8(data.to_vec()).context("Response is not UTF-8")?
                }
                Message::Close(_) => bail!("Connection closed by server"),
                _ => continue,
            };
            debug!("<- {}", raw);

            let response: RpcResponse =
                serde_json::from_str(&raw).context("Failed to parse RPC response")?;
            if response.id != Value::from(id) && !response.id.is_null() {
                warn!("Ignoring response for unexpected id {}", response.id);
                continue;
            }
            return Ok((raw, response));
        }
    }

    fn execute(&mut self, command: &str) -> Result<(String, RpcResponse)> {
        self.call("execute_george", serde_json::json!({ "command": command }))
    }

    fn close(mut self) {
        if self.socket.close(None).is_ok() {
            // Drain until the server acknowledges
            while self.socket.read().is_ok() {}
        }
    }
}

fn print_response(json: bool, (raw, response): (String, RpcResponse)) -> Result<()> {
    if json {
        println!("{}", raw);
        return Ok(());
    }
    println!("{}", response.into_result()?);
    Ok(())
}

fn repl(client: &mut Client, json: bool) -> Result<()> {
    let stdin = io::stdin();
    let mut failures = 0;
    for line in stdin.lock().lines() {
        let line = line?;
        let command = line.trim();
        if command.is_empty() || command.starts_with("//") {
            continue;
        }
        if let Err(e) = client
            .execute(command)
            .and_then(|response| print_response(json, response))
        {
            eprintln!("{}: {:#}", command, e);
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{} command(s) failed", failures);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .init();
    let cli = Cli::parse();

    let port = match cli.port {
        Some(port) => port,
        None => match std::env::var("TVP_RPC_WS_PORT") {
            Ok(port) => port
                .trim()
                .parse()
                .with_context(|| format!("Invalid TVP_RPC_WS_PORT: {}", port))?,
            Err(_) => DEFAULT_PORT,
        },
    };

    let mut client = Client::connect(&cli.host, port, Duration::from_secs(cli.timeout))?;
    client.binary = cli.binary;

    let result = match cli.command {
        Commands::Exec { command } => client
            .execute(&command.join(" "))
            .and_then(|response| print_response(cli.json, response)),
        Commands::Version => client
            .execute("tv_version")
            .and_then(|response| print_response(cli.json, response)),
        Commands::Repl => repl(&mut client, cli.json),
        Commands::Raw { method, params } => {
            let params = match params {
                Some(p) => serde_json::from_str(&p).context("Invalid JSON parameters")?,
                None => Value::Null,
            };
            client.call(&method, params).map(|(raw, _)| println!("{}", raw))
        }
    };

    client.close();
    result
}
