//! Command dispatch seam between the event loop and a command set.
//!
//! The loop knows nothing about command grammar: it hands each complete line
//! to a `Dispatcher` together with a `Responder` that writes back on the
//! originating connection.

use crate::runtime::connection::ConnectionId;
use crate::runtime::framer::CommandLine;
use bytes::BytesMut;
use std::net::SocketAddr;

/// Sent to every client right after accept, before `OK`.
pub const GREETING: &str = "geofix: type 'help' for a list of commands";

/// Handles complete command lines for the event loop.
pub trait Dispatcher: Send {
    /// Called once per accepted connection.
    fn on_connect(&mut self, conn: &mut Responder<'_>) {
        conn.write_line(GREETING);
        conn.ok();
    }

    /// Handle one command line. Responses are written through `conn`.
    fn dispatch(&mut self, conn: &mut Responder<'_>, line: &CommandLine);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Box<D> {
    fn on_connect(&mut self, conn: &mut Responder<'_>) {
        (**self).on_connect(conn)
    }

    fn dispatch(&mut self, conn: &mut Responder<'_>, line: &CommandLine) {
        (**self).dispatch(conn, line)
    }
}

/// Write handle for one connection.
///
/// Output is buffered and flushed by the loop without blocking.
pub struct Responder<'a> {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: &'a mut BytesMut,
    closing: &'a mut bool,
}

impl<'a> Responder<'a> {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        outbound: &'a mut BytesMut,
        closing: &'a mut bool,
    ) -> Self {
        Self {
            id,
            peer,
            outbound,
            closing,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue raw bytes.
    pub fn write(&mut self, data: &[u8]) {
        self.outbound.extend_from_slice(data);
    }

    /// Queue `line` followed by `\r\n`.
    pub fn write_line(&mut self, line: &str) {
        self.outbound.reserve(line.len() + 2);
        self.write(line.as_bytes());
        self.write(b"\r\n");
    }

    pub fn ok(&mut self) {
        self.write_line("OK");
    }

    /// Queue a `KO: <reason>` failure line.
    pub fn ko(&mut self, reason: &str) {
        self.write_line(&format!("KO: {reason}"));
    }

    /// Close the connection once queued output has been flushed.
    pub fn close(&mut self) {
        *self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        *self.closing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Dispatcher for Silent {
        fn dispatch(&mut self, _conn: &mut Responder<'_>, _line: &CommandLine) {}
    }

    #[test]
    fn test_default_greeting() {
        let mut out = BytesMut::new();
        let mut closing = false;
        let mut conn = Responder::new(
            ConnectionId(0),
            "127.0.0.1:1".parse().unwrap(),
            &mut out,
            &mut closing,
        );

        let mut dispatcher: Box<dyn Dispatcher> = Box::new(Silent);
        dispatcher.on_connect(&mut conn);

        assert_eq!(&out[..], format!("{GREETING}\r\nOK\r\n").as_bytes());
    }

    #[test]
    fn test_responder_writes() {
        let mut out = BytesMut::new();
        let mut closing = false;
        let mut conn = Responder::new(
            ConnectionId(3),
            "127.0.0.1:1".parse().unwrap(),
            &mut out,
            &mut closing,
        );

        conn.write(b"raw");
        conn.ko("bad");
        conn.close();
        assert!(conn.is_closing());
        assert_eq!(conn.id(), ConnectionId(3));

        assert_eq!(&out[..], b"rawKO: bad\r\n");
        assert!(closing);
    }
}
