//! Daemon surface: newline-delimited JSON-RPC over stdio in front of one
//! [`cidx::DaemonCache`], plus an optional watcher on the metadata sidecar.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_utils;
