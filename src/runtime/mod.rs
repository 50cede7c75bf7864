//! Single-threaded readiness runtime for line-oriented TCP clients.
//!
//! One mio loop owns every listener and connection:
//! - `LineFramer`: fixed-capacity line framing with overflow discard
//! - `ConnectionRegistry`: slab of per-connection state
//! - `Dispatcher`: hands complete lines to a command set
//! - `StopSignal`: cross-thread stop request that wakes the poller

mod connection;
mod dispatch;
mod event_loop;
mod framer;
mod signal;

pub use connection::{ConnParts, Connection, ConnectionId, ConnectionRegistry};
pub use dispatch::{Dispatcher, Responder, GREETING};
pub use event_loop::{BindTarget, EventLoop, LoopOptions};
pub use framer::{CommandLine, LineFramer};
pub use signal::StopSignal;
