//! Listening endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{coordinator, Endpoint};
use crate::allocator::IdAllocator;
use crate::config::{ServerConfig, SessionSettings};
use crate::dispatch::DispatchTable;
use crate::error::{NetError, Result};
use crate::protocol::{default_engine_factory, EngineFactory};
use crate::session::{elapsed_millis, CloseReason, KeepAlivePolicy, Role, Session, SessionConfig};
use crate::transport::Transport;

const LOG_TARGET: &str = "kinet::server";

/// Id pool and live sessions, always updated together.
#[derive(Debug)]
struct Registry {
    allocator: IdAllocator,
    sessions: HashMap<u16, Arc<Session>>,
}

/// Accepts connections and owns one session per connection.
pub struct Server {
    config: ServerConfig,
    session_config: SessionConfig,
    started_at: Instant,
    registry: Mutex<Registry>,
    dispatch: Option<Arc<DispatchTable>>,
    engine: EngineFactory,
    shutdown: CancellationToken,
}

impl Server {
    /// Create a server with default session settings.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_settings(config, SessionSettings::default())
    }

    /// Create a server with explicit session settings.
    pub fn with_settings(config: ServerConfig, settings: SessionSettings) -> Result<Self> {
        config.validate()?;
        let session_config = settings.session_config(config.keep_alive_interval()?)?;

        Ok(Self {
            registry: Mutex::new(Registry {
                allocator: IdAllocator::new(config.id_min, config.id_max),
                sessions: HashMap::new(),
            }),
            config,
            session_config,
            started_at: Instant::now(),
            dispatch: None,
            engine: default_engine_factory(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Route inbound messages of every session through `table`.
    pub fn with_dispatch(mut self, table: Arc<DispatchTable>) -> Self {
        self.dispatch = Some(table);
        self
    }

    /// Use `factory` to build each session's protocol engine.
    pub fn with_engine(mut self, factory: EngineFactory) -> Self {
        self.engine = factory;
        self
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Configuration handed to every new session.
    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// Milliseconds since this server was created.
    pub fn startup_timedelta(&self) -> u64 {
        elapsed_millis(self.started_at)
    }

    /// Live session by id.
    pub fn session(&self, id: u16) -> Option<Arc<Session>> {
        self.registry.lock().sessions.get(&id).cloned()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.lock().sessions.len()
    }

    /// Ids of live sessions, sorted.
    pub fn session_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.registry.lock().sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Bind the configured address and serve until [`Server::shutdown`].
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            target: LOG_TARGET,
            "Listening on {} (ids {}..={})",
            local_addr,
            self.config.id_min,
            self.config.id_max
        );

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(target: LOG_TARGET, "Accepted connection from {}", peer);
                        let endpoint: Arc<dyn Endpoint> = self.clone();
                        tokio::spawn(coordinator::drive(endpoint, stream));
                    },
                    // Accept errors (e.g. EMFILE) are per-connection; keep listening.
                    Err(e) => tracing::warn!(target: LOG_TARGET, "Accept failed: {}", e),
                },
            }
        }

        tracing::info!(target: LOG_TARGET, "Stopped listening on {}", local_addr);
        Ok(())
    }

    /// Stop accepting and close every live session.
    ///
    /// Connections that reach [`Endpoint::create_session`] afterwards are
    /// refused.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let sessions: Vec<Arc<Session>> = self.registry.lock().sessions.values().cloned().collect();
        tracing::info!(target: LOG_TARGET, "Shutting down, closing {} session(s)", sessions.len());
        for session in sessions {
            session.close(CloseReason::SessionDied);
        }
    }

    /// Whether [`Server::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Endpoint for Server {
    fn role(&self) -> Role {
        Role::Server
    }

    fn create_session(&self, transport: Arc<dyn Transport>) -> Result<Arc<Session>> {
        let mut registry = self.registry.lock();
        // Checked under the registry lock so a session is either refused
        // here or collected by `shutdown`.
        if self.shutdown.is_cancelled() {
            return Err(NetError::ShuttingDown);
        }
        let id = registry.allocator.allocate()?;

        let mut builder = Session::builder(Role::Server, id)
            .config(self.session_config.clone())
            .keep_alive(KeepAlivePolicy::Server {
                started_at: self.started_at,
            })
            .engine((self.engine)());
        if let Some(table) = &self.dispatch {
            builder = builder.dispatch(table.clone());
        }
        let session = builder.build(transport);

        registry.sessions.insert(id, session.clone());
        tracing::debug!(
            target: LOG_TARGET,
            "id={}, Session created ({} live)",
            id,
            registry.sessions.len()
        );
        Ok(session)
    }

    fn release_session(&self, session: &Session) {
        let id = session.id();
        let mut registry = self.registry.lock();

        let owned = registry
            .sessions
            .get(&id)
            .is_some_and(|live| std::ptr::eq(Arc::as_ptr(live), session));
        if !owned {
            tracing::warn!(target: LOG_TARGET, "id={}, Release of unknown session ignored", id);
            return;
        }

        registry.sessions.remove(&id);
        registry.allocator.free(id);
        tracing::debug!(
            target: LOG_TARGET,
            "id={}, Session released ({} live)",
            id,
            registry.sessions.len()
        );
    }
}
