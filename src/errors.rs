//! Error taxonomy for the DHCP subsystem.
//!
//! Per-option and per-event failures never surface here: they are recovered
//! locally (skip + warn) by the decoder and the manager's event dispatch.
//! Only construction-time and process-supervision failures propagate as
//! `DhcpError` to a caller.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhcpError {
    #[error("unknown or missing DHCP client '{0}'")]
    UnknownBackend(String),

    #[error("a DHCP manager already exists in this process")]
    AlreadyInitialized,

    #[error("failed to spawn DHCP helper for interface '{iface}': {source}")]
    SpawnFailed {
        iface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed DHCP event on '{0}': {1}")]
    MalformedEvent(String, &'static str),

    #[error("DHCP event references unknown pid {0}")]
    UnknownPid(u32),

    #[error("invalid value for option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("DHCP client on '{0}' timed out waiting for a lease")]
    Timeout(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("system bus error: {0}")]
    Zbus(#[from] zbus::Error),
}

pub type DhcpResult<T> = Result<T, DhcpError>;
