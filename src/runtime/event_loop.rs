//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One loop owns every listener and client socket. Dropping the loop closes
//! all of them, so every exit path (clean stop, fatal error, unwinding)
//! leaves nothing open.

use crate::config::RuntimeConfig;
use crate::error::ServiceError;
use crate::runtime::connection::{ConnParts, ConnectionId, ConnectionRegistry};
use crate::runtime::dispatch::{Dispatcher, Responder};
use crate::runtime::signal::StopSignal;
use bytes::Buf;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const WAKER_TOKEN: Token = Token(usize::MAX);

/// Reads per connection per readiness event. A client with more queued
/// input is resumed after the other ready connections.
const MAX_READS_PER_EVENT: usize = 16;

/// Listeners count down from just below the waker; connections count up
/// from zero.
fn listener_token(index: usize) -> Token {
    Token(usize::MAX - 1 - index)
}

/// A concrete address a listening socket is opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTarget {
    pub addr: SocketAddr,
}

impl BindTarget {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

/// Event loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    /// Receive buffer capacity per connection. Also the output backlog at
    /// which reading from a connection pauses.
    pub buffer_capacity: usize,
    /// Readiness events handled per poll.
    pub event_capacity: usize,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 2048,
            event_capacity: 128,
        }
    }
}

impl From<&RuntimeConfig> for LoopOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            buffer_capacity: config.buffer_size,
            event_capacity: config.event_capacity,
        }
    }
}

pub struct EventLoop<D> {
    poll: Poll,
    listeners: Vec<TcpListener>,
    connections: ConnectionRegistry<TcpStream>,
    /// Connections with input left unread after their last read pass.
    resume: Vec<ConnectionId>,
    dispatcher: D,
    stop: StopSignal,
    options: LoopOptions,
}

impl<D: Dispatcher> EventLoop<D> {
    /// Open and register a listener per target.
    ///
    /// Fails on the first bind error; listeners opened before it are closed
    /// when the partially built loop is dropped.
    pub fn bind(
        targets: &[BindTarget],
        options: LoopOptions,
        dispatcher: D,
        stop: StopSignal,
    ) -> Result<Self, ServiceError> {
        let poll = Poll::new().map_err(ServiceError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(ServiceError::Poll)?;
        stop.install(waker);

        let mut event_loop = EventLoop {
            poll,
            listeners: Vec::with_capacity(targets.len()),
            connections: ConnectionRegistry::new(),
            resume: Vec::new(),
            dispatcher,
            stop,
            options,
        };

        for (index, target) in targets.iter().enumerate() {
            let mut listener =
                create_listener(target.addr).map_err(|e| ServiceError::from_bind(target.addr, e))?;
            event_loop
                .poll
                .registry()
                .register(&mut listener, listener_token(index), Interest::READABLE)
                .map_err(|e| ServiceError::from_bind(target.addr, e))?;

            info!(addr = %target, "Listening");
            event_loop.listeners.push(listener);
        }

        if event_loop.listeners.is_empty() {
            warn!("No bind targets, no connections will be accepted");
        }

        Ok(event_loop)
    }

    /// Addresses the listeners are actually bound to.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until a stop is requested or polling fails.
    pub fn run(&mut self) -> Result<(), ServiceError> {
        let mut events = Events::with_capacity(self.options.event_capacity);

        info!(
            listeners = self.listeners.len(),
            buffer_capacity = self.options.buffer_capacity,
            "Event loop running"
        );

        while !self.stop.is_requested() {
            self.poll_once(&mut events, None)?;
        }

        info!(connections = self.connection_count(), "Stop requested");
        Ok(())
    }

    /// Wait for readiness once and handle every event.
    fn poll_once(
        &mut self,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<(), ServiceError> {
        let timeout = if self.resume.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        if let Err(e) = self.poll.poll(events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(ServiceError::Poll(e));
        }

        for event in events.iter() {
            match event.token() {
                WAKER_TOKEN => {}
                token => match self.listener_index(token) {
                    Some(index) => self.accept_connections(index),
                    None => self.handle_connection_event(ConnectionId(token.0), event),
                },
            }
        }

        for id in std::mem::take(&mut self.resume) {
            let pending = self.connections.get(id).is_some_and(|c| c.read_pending);
            if pending && self.read_connection(id) {
                self.flush_or_close(id);
            }
        }

        Ok(())
    }

    fn listener_index(&self, token: Token) -> Option<usize> {
        let index = (usize::MAX - 1).checked_sub(token.0)?;
        (index < self.listeners.len()).then_some(index)
    }

    fn accept_connections(&mut self, index: usize) {
        loop {
            match self.listeners[index].accept() {
                Ok((stream, peer)) => self.on_accept(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = self.connections.register(stream, peer);
        let Some(conn) = self.connections.get(id) else {
            return;
        };

        if let Err(e) =
            self.poll
                .registry()
                .register(&mut conn.stream, Token(id.0), Interest::READABLE)
        {
            warn!(peer = %peer, error = %e, "Failed to register connection");
            self.connections.unregister(id);
            return;
        }

        let mut responder = Responder::new(id, peer, &mut conn.outbound, &mut conn.closing);
        self.dispatcher.on_connect(&mut responder);

        debug!(conn_id = %id, peer = %peer, "Accepted connection");
        self.flush_or_close(id);
    }

    fn handle_connection_event(&mut self, id: ConnectionId, event: &Event) {
        if !self.connections.contains(id) {
            return;
        }

        if (event.is_readable() || event.is_read_closed() || event.is_error())
            && !self.read_connection(id)
        {
            return;
        }

        self.flush_or_close(id);
    }

    /// Service a readable connection. Returns `false` if it was closed.
    fn read_connection(&mut self, id: ConnectionId) -> bool {
        match self.handle_readable(id) {
            Ok(true) => true,
            Ok(false) => {
                debug!(conn_id = %id, "Connection closed by peer");
                self.close_connection(id);
                false
            }
            Err(e) => {
                debug!(conn_id = %id, error = %e, "Read error");
                self.close_connection(id);
                false
            }
        }
    }

    /// Read until the socket would block, dispatching every framed line.
    ///
    /// Stops early once the read budget is spent or unsent output reaches
    /// the buffer capacity; `read_pending` then records that input may be
    /// left in the socket. Returns `Ok(false)` when the peer closed the
    /// connection.
    fn handle_readable(&mut self, id: ConnectionId) -> io::Result<bool> {
        let capacity = self.options.buffer_capacity;
        let Some(conn) = self.connections.get(id) else {
            return Ok(true);
        };
        let ConnParts {
            stream,
            framer,
            outbound,
            closing,
            read_pending,
            peer,
        } = conn.parts(capacity);
        let dispatcher = &mut self.dispatcher;
        *read_pending = false;

        for _ in 0..MAX_READS_PER_EVENT {
            if *closing {
                return Ok(true);
            }
            if outbound.len() >= capacity {
                trace!(conn_id = %id, backlog = outbound.len(), "Output backlog, pausing reads");
                *read_pending = true;
                return Ok(true);
            }

            match stream.read(framer.spare_mut()) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    trace!(conn_id = %id, bytes = n, "Read");
                    framer.commit(n);

                    let mut responder = Responder::new(id, peer, outbound, closing);
                    framer.drain(|line| {
                        if responder.is_closing() {
                            return;
                        }
                        trace!(conn_id = %id, line = %line, "Dispatching");
                        dispatcher.dispatch(&mut responder, &line);
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        *read_pending = !*closing;
        Ok(true)
    }

    fn flush_or_close(&mut self, id: ConnectionId) {
        match self.flush(id) {
            Ok(true) => {}
            Ok(false) => self.close_connection(id),
            Err(e) => {
                debug!(conn_id = %id, error = %e, "Write error");
                self.close_connection(id);
            }
        }
    }

    /// Write queued output without blocking and keep registered interest in
    /// sync with what is left: writable while output is pending, readable
    /// unless the backlog has reached the buffer capacity. Returns
    /// `Ok(false)` once a closing connection has nothing left to send.
    fn flush(&mut self, id: ConnectionId) -> io::Result<bool> {
        let capacity = self.options.buffer_capacity;
        let Some(conn) = self.connections.get(id) else {
            return Ok(true);
        };

        while !conn.outbound.is_empty() {
            match conn.stream.write(&conn.outbound) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
                Ok(n) => conn.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let pending = !conn.outbound.is_empty();
        if conn.closing && !pending {
            return Ok(false);
        }

        let backlogged = conn.closing || conn.outbound.len() >= capacity;
        let readable = !(pending && backlogged);
        if (readable, pending) != (conn.read_interest, conn.write_interest) {
            let interest = match (readable, pending) {
                (true, true) => Interest::READABLE | Interest::WRITABLE,
                (false, _) => Interest::WRITABLE,
                (true, false) => Interest::READABLE,
            };
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(id.0), interest)?;
            conn.read_interest = readable;
            conn.write_interest = pending;
        }

        if conn.read_pending && !backlogged && !self.resume.contains(&id) {
            self.resume.push(id);
        }

        Ok(true)
    }

    fn close_connection(&mut self, id: ConnectionId) {
        if let Some(mut conn) = self.connections.unregister(id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(conn_id = %id, peer = %conn.peer, "Connection closed");
        }
    }
}

impl<D> EventLoop<D> {
    /// Close every client and listener. Safe to call more than once.
    fn shutdown(&mut self) {
        let connections = self.connections.len();
        let listeners = self.listeners.len();

        self.resume.clear();
        for (id, mut conn) in self.connections.drain() {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            trace!(conn_id = %id, peer = %conn.peer, "Closing connection");
        }
        for mut listener in self.listeners.drain(..) {
            let _ = self.poll.registry().deregister(&mut listener);
        }
        self.stop.uninstall();

        if connections > 0 || listeners > 0 {
            info!(connections, listeners, "Event loop closed all sockets");
        }
    }
}

impl<D> Drop for EventLoop<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Create a non-blocking listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::framer::CommandLine;
    use std::io::{BufRead, BufReader};
    use std::net::TcpStream as StdTcpStream;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    type Log = Arc<Mutex<Vec<(ConnectionId, String)>>>;

    /// Records every line and answers `OK`; `bye` closes the connection.
    struct Recorder {
        log: Log,
    }

    impl Dispatcher for Recorder {
        fn dispatch(&mut self, conn: &mut Responder<'_>, line: &CommandLine) {
            self.log
                .lock()
                .unwrap()
                .push((conn.id(), line.as_str().to_string()));
            if line.as_str() == "bye" {
                conn.close();
            } else {
                conn.ok();
            }
        }
    }

    struct Running {
        addr: SocketAddr,
        stop: StopSignal,
        log: Log,
        handle: JoinHandle<Result<(), ServiceError>>,
    }

    fn loopback() -> BindTarget {
        BindTarget::new("127.0.0.1:0".parse().unwrap())
    }

    fn spawn_loop(options: LoopOptions) -> Running {
        let log: Log = Arc::default();
        let stop = StopSignal::new();
        let mut event_loop = EventLoop::bind(
            &[loopback()],
            options,
            Recorder { log: log.clone() },
            stop.clone(),
        )
        .unwrap();
        let addr = event_loop.local_addrs()[0];
        let handle = thread::spawn(move || event_loop.run());
        Running {
            addr,
            stop,
            log,
            handle,
        }
    }

    fn connect(addr: SocketAddr) -> (StdTcpStream, BufReader<StdTcpStream>) {
        let stream = StdTcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        assert_eq!(read_line(&mut reader), crate::runtime::dispatch::GREETING);
        assert_eq!(read_line(&mut reader), "OK");
        (stream, reader)
    }

    fn read_line(reader: &mut BufReader<StdTcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.trim_end_matches("\r\n").to_string()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_lines_across_writes_dispatch_in_order() {
        let running = spawn_loop(LoopOptions::default());
        let (mut client, mut reader) = connect(running.addr);

        client.write_all(b"PING\n").unwrap();
        assert_eq!(read_line(&mut reader), "OK");
        client.write_all(b"PONG\n").unwrap();
        assert_eq!(read_line(&mut reader), "OK");

        let log = running.log.lock().unwrap().clone();
        let lines: Vec<_> = log.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(lines, vec!["PING", "PONG"]);
        assert_eq!(log[0].0, log[1].0);

        running.stop.request();
        running.handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_connections_are_isolated() {
        let running = spawn_loop(LoopOptions::default());
        let (mut first, mut first_reader) = connect(running.addr);
        let (mut second, mut second_reader) = connect(running.addr);

        first.write_all(b"geo fix 1").unwrap();
        second.write_all(b"ping\n").unwrap();
        assert_eq!(read_line(&mut second_reader), "OK");
        first.write_all(b" 2\n").unwrap();
        assert_eq!(read_line(&mut first_reader), "OK");

        let log = running.log.lock().unwrap().clone();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, "ping");
        assert_eq!(log[1].1, "geo fix 1 2");
        assert_ne!(log[0].0, log[1].0);

        running.stop.request();
        running.handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_overflow_through_socket() {
        let running = spawn_loop(LoopOptions {
            buffer_capacity: 8,
            ..LoopOptions::default()
        });
        let (mut client, mut reader) = connect(running.addr);

        client.write_all(b"AAAAAAAA").unwrap();
        assert_eq!(read_line(&mut reader), "OK");
        client.write_all(b"BBBB\nok\n").unwrap();
        assert_eq!(read_line(&mut reader), "OK");

        let lines: Vec<_> = running
            .log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        assert_eq!(lines, vec!["AAAAAAAA", "ok"]);

        running.stop.request();
        running.handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_input_beyond_read_budget_is_resumed() {
        let running = spawn_loop(LoopOptions {
            buffer_capacity: 16,
            ..LoopOptions::default()
        });
        let (mut client, mut reader) = connect(running.addr);

        // Far more than one pass of reads takes through a 16 byte buffer
        let lines: Vec<String> = (0..200).map(|i| format!("line{i}")).collect();
        let mut payload = lines.join("\n");
        payload.push('\n');
        client.write_all(payload.as_bytes()).unwrap();

        for _ in 0..lines.len() {
            assert_eq!(read_line(&mut reader), "OK");
        }

        let logged: Vec<_> = running
            .log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        assert_eq!(logged, lines);

        running.stop.request();
        running.handle.join().unwrap().unwrap();
    }

    /// Answers every line with `OK` and keeps nothing.
    struct Acker;

    impl Dispatcher for Acker {
        fn dispatch(&mut self, conn: &mut Responder<'_>, _line: &CommandLine) {
            conn.ok();
        }
    }

    #[test]
    fn test_non_reading_client_output_is_bounded() {
        let capacity = 256;
        let mut event_loop = EventLoop::bind(
            &[loopback()],
            LoopOptions {
                buffer_capacity: capacity,
                ..LoopOptions::default()
            },
            Acker,
            StopSignal::new(),
        )
        .unwrap();
        let addr = event_loop.local_addrs()[0];

        // Small receive window so responses back up quickly
        let socket =
            socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None).unwrap();
        socket.set_recv_buffer_size(4096).unwrap();
        socket.connect(&addr.into()).unwrap();
        let client: StdTcpStream = socket.into();
        client
            .set_write_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // Flood commands and never read a response
        let writer = thread::spawn(move || {
            let chunk = "x\n".repeat(32 * 1024);
            for _ in 0..300 {
                if (&client).write_all(chunk.as_bytes()).is_err() {
                    break;
                }
            }
            client
        });

        let mut events = Events::with_capacity(16);
        let mut max_backlog = 0;
        while !writer.is_finished() {
            event_loop
                .poll_once(&mut events, Some(Duration::from_millis(20)))
                .unwrap();
            if let Some(conn) = event_loop.connections.get(ConnectionId(0)) {
                max_backlog = max_backlog.max(conn.outbound.len());
            }
        }
        let _client = writer.join().unwrap();

        // One read of at most `capacity` bytes past the pause threshold
        assert!(
            max_backlog <= 3 * capacity,
            "output backlog reached {max_backlog} bytes"
        );
        let conn = event_loop
            .connections
            .get(ConnectionId(0))
            .expect("client disconnected");
        assert!(conn.outbound.len() >= capacity);
        assert!(!conn.read_interest);
        assert!(conn.read_pending);
    }

    #[test]
    fn test_dispatcher_close_request() {
        let running = spawn_loop(LoopOptions::default());
        let (mut client, mut reader) = connect(running.addr);

        client.write_all(b"bye\n").unwrap();
        let mut rest = String::new();
        // Server closes: read hits EOF
        assert_eq!(reader.read_line(&mut rest).unwrap(), 0);

        let lines: Vec<_> = running
            .log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        assert_eq!(lines, vec!["bye"]);

        running.stop.request();
        running.handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_closes_all_connections() {
        let log: Log = Arc::default();
        let stop = StopSignal::new();
        let mut event_loop =
            EventLoop::bind(&[loopback()], LoopOptions::default(), Recorder { log }, stop.clone())
                .unwrap();
        let addr = event_loop.local_addrs()[0];

        let handle = thread::spawn(move || {
            let result = event_loop.run();
            (result, event_loop.connection_count())
        });

        let mut clients: Vec<_> = (0..3).map(|_| connect(addr)).collect();

        stop.request();
        let (result, open_before_drop) = handle.join().unwrap();
        result.unwrap();
        assert_eq!(open_before_drop, 3);

        // Loop dropped inside the thread: every client sees EOF
        for (_, reader) in clients.iter_mut() {
            let mut rest = String::new();
            assert_eq!(reader.read_line(&mut rest).unwrap(), 0);
        }
        assert!(StdTcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_stop_before_run() {
        let stop = StopSignal::new();
        let mut event_loop = EventLoop::bind(
            &[loopback()],
            LoopOptions::default(),
            Recorder { log: Arc::default() },
            stop.clone(),
        )
        .unwrap();

        stop.request();
        event_loop.run().unwrap();
    }

    #[test]
    fn test_peer_close_unregisters() {
        let mut event_loop = EventLoop::bind(
            &[loopback()],
            LoopOptions::default(),
            Recorder { log: Arc::default() },
            StopSignal::new(),
        )
        .unwrap();
        let addr = event_loop.local_addrs()[0];
        let count = Arc::new(Mutex::new(usize::MAX));

        let observed = count.clone();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            // Serve in short slices so the connection count can be sampled
            let mut events = Events::with_capacity(16);
            while rx.try_recv().is_err() {
                event_loop
                    .poll_once(&mut events, Some(Duration::from_millis(20)))
                    .unwrap();
                *observed.lock().unwrap() = event_loop.connection_count();
            }
        });

        let (client, reader) = connect(addr);
        wait_for(|| *count.lock().unwrap() == 1);
        drop(client);
        drop(reader);
        wait_for(|| *count.lock().unwrap() == 0);

        tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_address_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = BindTarget::new(taken.local_addr().unwrap());

        let result = EventLoop::bind(
            &[target],
            LoopOptions::default(),
            Recorder { log: Arc::default() },
            StopSignal::new(),
        );
        assert!(matches!(result, Err(ServiceError::AddressInUse { .. })));
    }

    #[test]
    fn test_failed_bind_closes_earlier_listeners() {
        let free = {
            let scratch = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            scratch.local_addr().unwrap()
        };
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

        let result = EventLoop::bind(
            &[BindTarget::new(free), BindTarget::new(taken.local_addr().unwrap())],
            LoopOptions::default(),
            Recorder { log: Arc::default() },
            StopSignal::new(),
        );
        assert!(result.is_err());

        // The first listener was released with the partially built loop
        std::net::TcpListener::bind(free).unwrap();
    }

    #[test]
    fn test_no_targets_is_empty_loop() {
        let event_loop = EventLoop::bind(
            &[],
            LoopOptions::default(),
            Recorder { log: Arc::default() },
            StopSignal::new(),
        )
        .unwrap();
        assert!(event_loop.local_addrs().is_empty());
    }
}
