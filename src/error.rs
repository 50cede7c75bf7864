//! Error types for the control channel.
//!
//! Only loop-fatal conditions are represented by `ServiceError`; per-connection
//! I/O failures are absorbed by the event loop and never leave it.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Port used when `listen_port` is missing or invalid.
pub const DEFAULT_PORT: u16 = 5554;

/// Problems found while resolving bind targets from settings.
///
/// These are recovered locally (default port, empty target set) and surfaced
/// to observers as error events.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port number {value}. Defaulting to {}.", DEFAULT_PORT)]
    InvalidPort { value: String },

    #[error("Network interface '{name}' not found")]
    UnknownInterface { name: String },

    #[error("Failed to list addresses of interface '{name}': {source}")]
    InterfaceLookup {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Conditions that stop (or prevent) the event loop.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Address {addr} is already in use")]
    AddressInUse { addr: SocketAddr },

    #[error("Permission denied to listen on {addr}")]
    BindPermissionDenied { addr: SocketAddr },

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied to provide mock locations: {0}")]
    MockLocationDenied(String),

    #[error("Event loop failed: {0}")]
    Poll(#[source] io::Error),

    #[error("Failed to spawn event loop thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Event loop panicked: {0}")]
    Panicked(String),
}

impl ServiceError {
    /// Classify a bind failure into its user-facing category.
    pub fn from_bind(addr: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse => ServiceError::AddressInUse { addr },
            io::ErrorKind::PermissionDenied => ServiceError::BindPermissionDenied { addr },
            _ => ServiceError::Bind { addr, source },
        }
    }
}
