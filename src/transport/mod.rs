//! Transport layer abstraction.
//!
//! A [`Transport`] is the write/close half of one byte-stream connection,
//! as seen by a session. The read half is driven separately and feeds the
//! connection coordinator (`connection_made`, `data_received`,
//! `connection_lost`).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Session / Coordinator         │
//! │          (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  TcpTransport   │ │ MemoryTransport │
//! │ (tokio socket)  │ │ (in-process)    │
//! └─────────────────┘ └─────────────────┘
//! ```

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::{read_loop, TcpTransport, READ_BUFFER_SIZE};

use std::net::SocketAddr;

/// Write/close handle for one connection.
///
/// Both operations are non-blocking and never fail from the caller's point
/// of view: writes to a closed transport are dropped, and closing twice is
/// harmless.
pub trait Transport: Send + Sync {
    /// Queue bytes for transmission.
    fn write(&self, data: &[u8]);

    /// Close the connection. Queued bytes are flushed first where possible.
    fn close(&self);

    /// Remote address, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}
