pub mod bridge;
pub mod config;
pub mod host;
pub mod logging;
pub mod rpc;

#[cfg(test)]
pub mod test;
