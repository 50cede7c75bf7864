//! Console protocol.
//!
//! Plain-text commands, one per line. Every command is answered with `OK`
//! or `KO: <reason>`, optionally preceded by output lines:
//!
//! ```text
//! Request:  ping hello
//! Response: PONG hello
//!           OK
//!
//! Request:  geo fix -122.084 37.422 12 6
//! Response: OK
//!
//! Request:  geo fix 200 0
//! Response: KO: longitude must be in [-180, 180]
//! ```

pub mod handler;
pub mod parser;

pub use handler::ConsoleDispatcher;
pub use parser::{parse, Command, FixArgs, ParseError};
