//! Console dispatcher.

use super::parser::{self, Command, ParseError, HELP};
use crate::lifecycle::{Fix, LocationProvider};
use crate::runtime::{CommandLine, Dispatcher, Responder};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Runs console commands and forwards fixes to the location provider.
pub struct ConsoleDispatcher {
    provider: Arc<dyn LocationProvider>,
}

impl ConsoleDispatcher {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self { provider }
    }
}

impl Dispatcher for ConsoleDispatcher {
    fn dispatch(&mut self, conn: &mut Responder<'_>, line: &CommandLine) {
        let command = match parser::parse(line.as_str()) {
            Ok(command) => command,
            Err(ParseError::Empty) => return,
            Err(e) => {
                debug!(conn_id = %conn.id(), peer = %conn.peer(), error = %e, "Rejected command");
                conn.ko(&e.to_string());
                return;
            }
        };

        match command {
            Command::Help => {
                for line in HELP {
                    conn.write_line(line);
                }
                conn.ok();
            }
            Command::Ping(None) => {
                conn.write_line("PONG");
                conn.ok();
            }
            Command::Ping(Some(message)) => {
                conn.write_line(&format!("PONG {message}"));
                conn.ok();
            }
            Command::Quit => {
                conn.ok();
                conn.close();
            }
            Command::GeoFix(args) => {
                let fix = Fix {
                    longitude: args.longitude,
                    latitude: args.latitude,
                    altitude: args.altitude,
                    satellites: args.satellites,
                    velocity: args.velocity,
                    time: Utc::now(),
                };
                match self.provider.inject(&fix) {
                    Ok(()) => conn.ok(),
                    Err(reason) => conn.ko(&reason),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LoggingProvider;
    use crate::runtime::ConnectionId;
    use bytes::BytesMut;

    /// Run `input` through a fresh responder, returning output and close flag.
    fn run(dispatcher: &mut ConsoleDispatcher, input: &str) -> (String, bool) {
        let mut out = BytesMut::new();
        let mut closing = false;
        let mut conn = Responder::new(
            ConnectionId(0),
            "127.0.0.1:1".parse().unwrap(),
            &mut out,
            &mut closing,
        );
        let mut line = None;
        crate::runtime::LineFramer::new(256).feed(input.as_bytes(), |l| line = Some(l));
        dispatcher.dispatch(&mut conn, &line.expect("no line framed"));
        (String::from_utf8(out.to_vec()).unwrap(), closing)
    }

    fn registered() -> (Arc<LoggingProvider>, ConsoleDispatcher) {
        let provider = Arc::new(LoggingProvider::new());
        provider.register().unwrap();
        (provider.clone(), ConsoleDispatcher::new(provider))
    }

    #[test]
    fn test_ping() {
        let (_, mut dispatcher) = registered();
        assert_eq!(run(&mut dispatcher, "ping\n").0, "PONG\r\nOK\r\n");
        assert_eq!(run(&mut dispatcher, "PING hi there\r\n").0, "PONG hi there\r\nOK\r\n");
    }

    #[test]
    fn test_help_lists_commands() {
        let (_, mut dispatcher) = registered();
        let (out, closing) = run(&mut dispatcher, "help\n");
        assert!(!closing);
        assert_eq!(out.lines().count(), HELP.len() + 1);
        assert!(out.ends_with("OK\r\n"));
    }

    #[test]
    fn test_quit_closes() {
        let (_, mut dispatcher) = registered();
        assert_eq!(run(&mut dispatcher, "exit\n"), ("OK\r\n".to_string(), true));
    }

    #[test]
    fn test_geo_fix_injects() {
        let (provider, mut dispatcher) = registered();
        assert_eq!(run(&mut dispatcher, "geo fix 14.42 50.08 230\n").0, "OK\r\n");

        let fix = provider.last_fix().unwrap();
        assert_eq!(fix.longitude, 14.42);
        assert_eq!(fix.latitude, 50.08);
        assert_eq!(fix.altitude, Some(230.0));
        assert_eq!(fix.satellites, None);
    }

    #[test]
    fn test_geo_fix_rejected() {
        let (provider, mut dispatcher) = registered();
        assert_eq!(
            run(&mut dispatcher, "geo fix 200 0\n").0,
            "KO: longitude must be in [-180, 180]\r\n"
        );
        assert!(provider.last_fix().is_none());
    }

    #[test]
    fn test_provider_failure_is_ko() {
        let mut dispatcher = ConsoleDispatcher::new(Arc::new(LoggingProvider::new()));
        assert_eq!(
            run(&mut dispatcher, "geo fix 1 2\n").0,
            "KO: location provider is not registered\r\n"
        );
    }

    #[test]
    fn test_unknown_and_empty_lines() {
        let (_, mut dispatcher) = registered();
        assert_eq!(
            run(&mut dispatcher, "teleport\n").0,
            "KO: unknown command 'teleport', try 'help'\r\n"
        );
        assert_eq!(run(&mut dispatcher, "\n").0, "");
    }
}
