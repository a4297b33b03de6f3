//! TCP transport on top of tokio sockets.
//!
//! The write half is owned by a background task fed through an unbounded
//! channel, so `write` never blocks the caller. The read half is handed
//! back to the endpoint, which pumps it with [`read_loop`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Transport;

/// Size of the buffer used for each socket read.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// TCP connection handle.
#[derive(Debug)]
pub struct TcpTransport {
    /// Remote address.
    peer_addr: Option<SocketAddr>,
    /// Queue feeding the writer task.
    tx: mpsc::UnboundedSender<Bytes>,
    /// Cancelled once the connection is closed from either side.
    shutdown: CancellationToken,
}

impl TcpTransport {
    /// Split `stream`, spawn its writer task, and return the transport
    /// together with the read half.
    pub fn spawn(stream: TcpStream) -> (Arc<Self>, OwnedReadHalf) {
        let peer_addr = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(write_loop(writer, rx, shutdown.clone()));

        let transport = Arc::new(Self {
            peer_addr,
            tx,
            shutdown,
        });
        (transport, reader)
    }

    /// Token cancelled when this transport is closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether `close` has been called or the writer failed.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Transport for TcpTransport {
    fn write(&self, data: &[u8]) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Bytes::copy_from_slice(data));
    }

    fn close(&self) {
        self.shutdown.cancel();
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            next = rx.recv() => {
                let Some(bytes) = next else { break };
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::debug!(target: "kinet::protocol", "TCP write failed: {}", e);
                    shutdown.cancel();
                    return;
                }
            }
            () = shutdown.cancelled() => break,
        }
    }

    // Flush whatever was queued before the close request.
    while let Ok(bytes) = rx.try_recv() {
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Read from `reader` until EOF, error, or `shutdown`, handing every chunk
/// to `on_data` in arrival order.
///
/// Returns the I/O error that ended the connection, if any.
pub async fn read_loop<F>(
    mut reader: OwnedReadHalf,
    shutdown: CancellationToken,
    mut on_data: F,
) -> Option<io::Error>
where
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return None,
            read = reader.read(&mut buf) => match read {
                Ok(0) => return None,
                Ok(n) => on_data(&buf[..n]),
                Err(e) => return Some(e),
            },
        }
    }
}
