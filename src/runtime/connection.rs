//! Per-connection state and the registry that owns it.
//!
//! Each accepted client gets a slab slot; the slot index doubles as the
//! connection id and the mio token. The framing buffer is allocated on the
//! first read so idle clients only cost their socket.

use crate::runtime::framer::LineFramer;
use bytes::BytesMut;
use slab::Slab;
use std::fmt;
use std::net::SocketAddr;

/// Stable identifier of a live connection (its slab index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single client connection.
pub struct Connection<S> {
    pub stream: S,
    pub peer: SocketAddr,
    framer: Option<LineFramer>,
    /// Response bytes not yet accepted by the socket.
    pub outbound: BytesMut,
    /// Set by the dispatcher to close once pending output is flushed.
    pub closing: bool,
    /// Reading stopped before the socket reported WouldBlock.
    pub read_pending: bool,
    /// Interest currently registered with the poller.
    pub read_interest: bool,
    pub write_interest: bool,
}

impl<S> Connection<S> {
    fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            framer: None,
            outbound: BytesMut::new(),
            closing: false,
            read_pending: false,
            read_interest: true,
            write_interest: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn has_framer(&self) -> bool {
        self.framer.is_some()
    }

    /// Split the connection into the parts used while servicing a read.
    pub fn parts(&mut self, capacity: usize) -> ConnParts<'_, S> {
        ConnParts {
            stream: &mut self.stream,
            framer: self
                .framer
                .get_or_insert_with(|| LineFramer::new(capacity)),
            outbound: &mut self.outbound,
            closing: &mut self.closing,
            read_pending: &mut self.read_pending,
            peer: self.peer,
        }
    }
}

/// Disjoint borrows of one connection.
pub struct ConnParts<'a, S> {
    pub stream: &'a mut S,
    pub framer: &'a mut LineFramer,
    pub outbound: &'a mut BytesMut,
    pub closing: &'a mut bool,
    pub read_pending: &'a mut bool,
    pub peer: SocketAddr,
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            connections: Slab::new(),
        }
    }

    /// Track a freshly accepted stream with empty framing state.
    pub fn register(&mut self, stream: S, peer: SocketAddr) -> ConnectionId {
        ConnectionId(self.connections.insert(Connection::new(stream, peer)))
    }

    pub fn get(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id.0)
    }

    /// Forget a connection, releasing its buffers. The stream is handed
    /// back so the caller can deregister it before it is dropped.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        self.connections.try_remove(id.0)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains(id.0)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every connection, for loop teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = (ConnectionId, Connection<S>)> {
        std::mem::take(&mut self.connections)
            .into_iter()
            .map(|(key, conn)| (ConnectionId(key), conn))
    }
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
