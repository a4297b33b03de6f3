//! In-memory transport.
//!
//! Records everything written to it and every close request, which makes it
//! the transport of choice for exercising sessions and coordinators without
//! sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::Transport;
use crate::error::Result;
use crate::protocol::{Frame, JsonLinesEngine, ProtocolEngine};

/// Transport that keeps written bytes in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    /// Fake remote address.
    peer_addr: Option<SocketAddr>,
    /// Every chunk written while open, in order.
    writes: Mutex<Vec<Bytes>>,
    /// Number of `close` calls.
    close_calls: AtomicUsize,
}

impl MemoryTransport {
    /// Create an open transport without a peer address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an open transport reporting `peer_addr`.
    pub fn with_peer(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr: Some(peer_addr),
            ..Self::default()
        }
    }

    /// Chunks written so far.
    pub fn writes(&self) -> Vec<Bytes> {
        self.writes.lock().clone()
    }

    /// Written bytes decoded as JSON-lines frames.
    ///
    /// Fails with [`NetError::InvalidData`](crate::NetError::InvalidData)
    /// if anything written is not a valid frame.
    pub fn frames(&self) -> Result<Vec<Frame>> {
        let mut engine = JsonLinesEngine::new();
        let mut frames = Vec::new();
        for chunk in self.writes.lock().iter() {
            frames.extend(engine.decode(chunk)?);
        }
        Ok(frames)
    }

    /// Forget recorded writes.
    pub fn clear(&self) {
        self.writes.lock().clear();
    }

    /// Whether `close` has been called at least once.
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// How many times `close` has been called.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn write(&self, data: &[u8]) {
        if self.is_closed() {
            return;
        }
        self.writes.lock().push(Bytes::copy_from_slice(data));
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
