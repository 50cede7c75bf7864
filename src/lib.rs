//! geofix: a line-oriented TCP control channel for mock location fixes.
//!
//! - `runtime`: single-threaded mio loop, line framing, connection registry
//! - `lifecycle`: start/stop controller, bind target resolution, collaborators
//! - `protocols`: the console command set
//! - `config`: CLI and TOML configuration

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocols;
pub mod runtime;
