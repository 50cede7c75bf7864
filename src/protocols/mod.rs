//! Protocol implementations.
//!
//! - `console`: line-based command console driving the location provider

pub mod console;
