//! Startup configuration, read once from the environment

use std::env;
use std::fmt::Display;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use log::*;
use thiserror::Error;

use crate::rpc::{OverflowPolicy, RpcConfig};

/// Listen port
pub const ENV_PORT: &str = "TVP_RPC_WS_PORT";
/// Listen address
pub const ENV_HOST: &str = "TVP_RPC_WS_HOST";
/// Directory for the log file
pub const ENV_LOG_PATH: &str = "TVP_RPC_LOG_PATH";
/// Pending command bound, 0 for unbounded
pub const ENV_QUEUE_CAPACITY: &str = "TVP_RPC_QUEUE_CAPACITY";
/// `reject-new` or `drop-oldest`
pub const ENV_QUEUE_POLICY: &str = "TVP_RPC_QUEUE_POLICY";

/// Environment variable that was set but could not be used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Ignoring invalid {key}={value:?}: {reason}")]
pub struct InvalidVar {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub server: RpcConfig,
    /// Log to `<log_dir>/.tvpaint-rpc.log` instead of stderr
    pub log_dir: Option<PathBuf>,
    /// Variables that kept their default because they did not parse
    pub invalid: Vec<InvalidVar>,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults. Unparsable ones are ignored and
    /// collected in `invalid`, since the logger is usually not installed yet.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut invalid = Vec::new();

        if let Some(port) = parse_var(&lookup, ENV_PORT, &mut invalid) {
            config.server.port = port;
        }
        if let Some(host) = parse_var(&lookup, ENV_HOST, &mut invalid) {
            config.server.host = host;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_QUEUE_CAPACITY, &mut invalid) {
            config.server.queue_capacity = capacity;
        }
        if let Some(policy) = parse_var(&lookup, ENV_QUEUE_POLICY, &mut invalid) {
            config.server.overflow_policy = policy;
        }
        config.log_dir = lookup(ENV_LOG_PATH)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        config.invalid = invalid;

        config
    }

    /// Logs the variables that were ignored, once logging is set up
    pub fn report_invalid(&self) {
        for invalid in &self.invalid {
            warn!("{}", invalid);
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str, invalid: &mut Vec<InvalidVar>) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            invalid.push(InvalidVar {
                key,
                reason: e.to_string(),
                value: raw,
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::DEFAULT_PORT;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    fn config(vars: &[(&str, &str)]) -> BridgeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.server.queue_capacity, 1024);
        assert_eq!(config.server.overflow_policy, OverflowPolicy::RejectNew);
        assert_eq!(config.log_dir, None);
        assert!(config.invalid.is_empty());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            (ENV_PORT, "4242"),
            (ENV_HOST, "0.0.0.0"),
            (ENV_LOG_PATH, "/var/log/tvpaint"),
            (ENV_QUEUE_CAPACITY, "0"),
            (ENV_QUEUE_POLICY, "drop-oldest"),
        ]);
        assert_eq!(config.server.port, 4242);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/tvpaint")));
        assert_eq!(config.server.queue_capacity, 0);
        assert_eq!(config.server.overflow_policy, OverflowPolicy::DropOldest);
        assert!(config.invalid.is_empty());
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config(&[
            (ENV_PORT, "not-a-port"),
            (ENV_HOST, "localhost:80"),
            (ENV_QUEUE_POLICY, "drop-newest"),
            (ENV_LOG_PATH, "  "),
        ]);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.server.overflow_policy, OverflowPolicy::RejectNew);
        assert_eq!(config.log_dir, None);

        let keys: Vec<_> = config.invalid.iter().map(|v| v.key).collect();
        assert_eq!(keys, [ENV_PORT, ENV_HOST, ENV_QUEUE_POLICY]);
        assert_eq!(config.invalid[0].value, "not-a-port");
        assert!(
            config.invalid[0]
                .to_string()
                .starts_with(r#"Ignoring invalid TVP_RPC_WS_PORT="not-a-port": "#)
        );
    }
}
