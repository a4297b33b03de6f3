//! Connecting endpoint.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;

use super::{coordinator, Coordinator, Endpoint};
use crate::config::{ClientConfig, SessionSettings};
use crate::dispatch::DispatchTable;
use crate::error::{NetError, Result};
use crate::protocol::{default_engine_factory, EngineFactory};
use crate::session::{CloseReason, KeepAlivePolicy, Role, Session, SessionConfig};
use crate::transport::{TcpTransport, Transport};

const LOG_TARGET: &str = "kinet::client";

/// Client sessions always carry this id.
pub const CLIENT_SESSION_ID: u16 = 0;

/// Opens a single outbound connection and owns its session.
pub struct Client {
    config: ClientConfig,
    session_config: SessionConfig,
    dispatch: Option<Arc<DispatchTable>>,
    engine: EngineFactory,
    session: Mutex<Option<Arc<Session>>>,
}

impl Client {
    /// Create a client with default session settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_settings(config, SessionSettings::default())
    }

    /// Create a client with explicit session settings.
    pub fn with_settings(config: ClientConfig, settings: SessionSettings) -> Result<Self> {
        config.validate()?;
        let session_config = settings.session_config(config.keep_alive_interval()?)?;

        Ok(Self {
            config,
            session_config,
            dispatch: None,
            engine: default_engine_factory(),
            session: Mutex::new(None),
        })
    }

    /// Route inbound messages through `table`.
    pub fn with_dispatch(mut self, table: Arc<DispatchTable>) -> Self {
        self.dispatch = Some(table);
        self
    }

    /// Use `factory` to build the session's protocol engine.
    pub fn with_engine(mut self, factory: EngineFactory) -> Self {
        self.engine = factory;
        self
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current session, if connected.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    /// Connect to the configured server.
    ///
    /// Returns once the transport is up; the handshake completes when the
    /// server's offer arrives. A still-open previous session is closed.
    pub async fn connect(self: &Arc<Self>) -> Result<Arc<Session>> {
        let addr = self.config.server_addr();
        let timeout = self.config.connect_timeout()?;

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                tracing::warn!(target: LOG_TARGET, "Connect to {} timed out after {:?}", addr, timeout);
                return Err(NetError::Timeout(timeout));
            },
        };
        tracing::info!(target: LOG_TARGET, "Connected to {}", addr);

        let (transport, reader) = TcpTransport::spawn(stream);
        let shutdown = transport.shutdown_token();

        let endpoint: Arc<dyn Endpoint> = self.clone();
        let mut coordinator = Coordinator::new(endpoint);
        let session = coordinator
            .connection_made(transport)
            .ok_or(NetError::SessionClosed)?;

        tokio::spawn(coordinator::pump(coordinator, reader, shutdown));
        Ok(session)
    }
}

impl Endpoint for Client {
    fn role(&self) -> Role {
        Role::Client
    }

    fn create_session(&self, transport: Arc<dyn Transport>) -> Result<Arc<Session>> {
        let mut builder = Session::builder(Role::Client, CLIENT_SESSION_ID)
            .config(self.session_config.clone())
            .keep_alive(KeepAlivePolicy::Client)
            .engine((self.engine)());
        if let Some(table) = &self.dispatch {
            builder = builder.dispatch(table.clone());
        }
        let session = builder.build(transport);

        let previous = self.session.lock().replace(session.clone());
        if let Some(previous) = previous {
            previous.close(CloseReason::SessionDied);
        }
        Ok(session)
    }

    fn release_session(&self, session: &Session) {
        let mut slot = self.session.lock();
        if slot
            .as_ref()
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), session))
        {
            *slot = None;
        }
    }
}
