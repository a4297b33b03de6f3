//! Per-connection glue between a transport and its session.

use std::io;
use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::Endpoint;
use crate::session::{CloseReason, Session};
use crate::transport::{read_loop, TcpTransport, Transport};

/// Binds the three transport events of one connection to session lifecycle.
pub struct Coordinator {
    endpoint: Option<Arc<dyn Endpoint>>,
    session: Option<Arc<Session>>,
}

impl Coordinator {
    /// Create a coordinator for one connection to or from `endpoint`.
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            endpoint: Some(endpoint),
            session: None,
        }
    }

    /// Session created for this connection, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// The transport is live: create the session, or refuse the connection.
    ///
    /// On refusal the transport is closed immediately and no session is
    /// ever constructed.
    pub fn connection_made(&mut self, transport: Arc<dyn Transport>) -> Option<Arc<Session>> {
        let endpoint = self.endpoint.as_ref()?;
        let peer = transport.peer_addr();

        match endpoint.create_session(transport.clone()) {
            Ok(session) => {
                tracing::debug!(
                    target: "kinet::session",
                    "id={}, {} connection made ({:?})",
                    session.id(),
                    transport.name(),
                    peer
                );
                self.session = Some(session.clone());
                session.on_connected();
                Some(session)
            },
            Err(e) => {
                tracing::warn!(
                    target: "kinet::server",
                    "Refusing {} connection from {:?}: {}",
                    transport.name(),
                    peer,
                    e
                );
                transport.close();
                None
            },
        }
    }

    /// Forward inbound bytes. A no-op when no session is attached.
    pub fn data_received(&self, data: &[u8]) {
        if let Some(session) = &self.session {
            session.process_data(data);
        }
    }

    /// The transport is gone: release the id, close the session, and drop
    /// the endpoint reference.
    pub fn connection_lost(&mut self, error: Option<io::Error>) {
        let endpoint = self.endpoint.take();
        let Some(session) = self.session.as_ref() else {
            return;
        };

        match &error {
            Some(e) => tracing::debug!(target: "kinet::session", "id={}, Connection lost: {}", session.id(), e),
            None => tracing::debug!(target: "kinet::session", "id={}, Connection lost", session.id()),
        }

        if let Some(endpoint) = endpoint {
            endpoint.release_session(session);
        }
        session.close(CloseReason::SessionDied);
    }
}

/// Pump `reader` into `coordinator` until the connection ends.
pub(crate) async fn pump(mut coordinator: Coordinator, reader: OwnedReadHalf, shutdown: CancellationToken) {
    let error = read_loop(reader, shutdown, |data| coordinator.data_received(data)).await;
    coordinator.connection_lost(error);
}

/// Run one accepted TCP connection to completion.
pub(crate) async fn drive(endpoint: Arc<dyn Endpoint>, stream: TcpStream) {
    let (transport, reader) = TcpTransport::spawn(stream);
    let shutdown = transport.shutdown_token();

    let mut coordinator = Coordinator::new(endpoint);
    if coordinator.connection_made(transport).is_none() {
        return;
    }
    pump(coordinator, reader, shutdown).await;
}
