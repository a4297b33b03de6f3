//! The session state machine.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::supervisor::{self, KeepAlivePolicy, PeriodicTask};
use super::{AccessLevel, CloseReason, Role, SessionConfig, WatchdogMode, HEARTBEAT_TIMEOUT_FACTOR};
use crate::dispatch::DispatchTable;
use crate::error::{NetError, Result};
use crate::protocol::{Frame, JsonLinesEngine, Message, ProtocolEngine};
use crate::transport::Transport;

const LOG_TARGET: &str = "kinet::session";

/// Periodic tasks owned by a session.
#[derive(Debug, Default)]
struct Tasks {
    watchdog: Option<PeriodicTask>,
    keep_alive: Option<PeriodicTask>,
    /// Set by `close`; no task may be started afterwards.
    shut: bool,
}

/// One open, persistent connection.
///
/// Sessions are shared as `Arc<Session>`. All state is behind short
/// critical sections so any task may call into a session, but no lock is
/// held while a handler runs or while the transport is written.
pub struct Session {
    id: u16,
    role: Role,
    config: SessionConfig,
    keep_alive: KeepAlivePolicy,
    dispatch: Option<Arc<DispatchTable>>,
    access_level: AtomicU8,
    alive: AtomicBool,
    last_heartbeat: Mutex<Option<Instant>>,
    /// Keep-alive interval announced by the peer, in millis; 0 until known
    peer_keep_alive_ms: AtomicU64,
    engine: Mutex<Box<dyn ProtocolEngine>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    tasks: Mutex<Tasks>,
    close_reason: Mutex<Option<CloseReason>>,
    closed: CancellationToken,
    weak: Weak<Session>,
}

impl Session {
    /// Start assembling a session.
    pub fn builder(role: Role, id: u16) -> SessionBuilder {
        SessionBuilder::new(role, id)
    }

    /// Session id: allocated by a server, always `0` on a client.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Which side of the connection this session is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Timing and policy this session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current access level.
    pub fn access_level(&self) -> AccessLevel {
        AccessLevel::from_u8(self.access_level.load(Ordering::SeqCst))
    }

    /// Whether the handshake has completed.
    pub fn is_established(&self) -> bool {
        self.access_level() >= AccessLevel::Established
    }

    /// Whether the transport is still held.
    pub fn is_open(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Remote address of the transport, while open.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.lock().as_ref().and_then(|t| t.peer_addr())
    }

    /// Reason passed to the `close` call that released the transport.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Wait until the session has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Whether the keep-alive sender is running.
    pub fn is_keeping_alive(&self) -> bool {
        self.tasks.lock().keep_alive.is_some()
    }

    /// Whether the watchdog is running.
    pub fn is_watched(&self) -> bool {
        self.tasks.lock().watchdog.is_some()
    }

    // ------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------

    /// Record a sign of life from the peer.
    ///
    /// This is the one mutation point open to the protocol side. Inbound
    /// heartbeat frames call it automatically.
    pub fn mark_alive(&self) {
        *self.last_heartbeat.lock() = Some(Instant::now());
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Current value of the liveness flag.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// When the most recent heartbeat arrived.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self.last_heartbeat.lock()
    }

    /// Keep-alive interval the peer announced during the handshake.
    pub fn peer_keep_alive_interval(&self) -> Option<Duration> {
        match self.peer_keep_alive_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Oldest heartbeat the observe-mode watchdog still accepts.
    ///
    /// The configured timeout wins. Otherwise it is
    /// [`HEARTBEAT_TIMEOUT_FACTOR`] times the peer's keep-alive interval,
    /// or the local one while the peer's is unknown.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.config.heartbeat_timeout.unwrap_or_else(|| {
            self.peer_keep_alive_interval()
                .unwrap_or(self.config.keep_alive_interval)
                .saturating_mul(HEARTBEAT_TIMEOUT_FACTOR)
        })
    }

    /// Watchdog read of the liveness state.
    pub(crate) fn check_alive(&self, mode: WatchdogMode) -> bool {
        match mode {
            WatchdogMode::Observe => self
                .last_heartbeat()
                .is_some_and(|seen| seen.elapsed() <= self.heartbeat_timeout()),
            WatchdogMode::Consume => self.alive.swap(false, Ordering::SeqCst),
        }
    }

    fn record_peer_keep_alive(&self, interval: Duration) {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.peer_keep_alive_ms.store(ms, Ordering::SeqCst);
    }

    /// Called when the watchdog finds the session dead.
    pub(crate) fn on_timeout(&self) {
        tracing::debug!(target: LOG_TARGET, "id={}, Session timed out!", self.id);
        self.close(CloseReason::SessionDied);
    }

    // ------------------------------------------------------------------
    // Access level
    // ------------------------------------------------------------------

    /// Handshake complete: move to ESTABLISHED and start keep-alives.
    ///
    /// Repeated calls, and calls on an already authenticated session, do
    /// not lower the level or start a second sender.
    pub fn on_established(&self) {
        tracing::debug!(target: LOG_TARGET, "id={}, on_established()", self.id);

        let previous = self
            .access_level
            .fetch_max(AccessLevel::Established as u8, Ordering::SeqCst);
        if previous == AccessLevel::New as u8 {
            self.start_keep_alive();
        }
    }

    /// Elevate an established session to AUTHENTICATED.
    pub fn authenticate(&self) -> Result<()> {
        if !self.is_open() {
            return Err(NetError::SessionClosed);
        }
        if !self.is_established() {
            return Err(NetError::NotEstablished);
        }
        self.access_level
            .fetch_max(AccessLevel::Authenticated as u8, Ordering::SeqCst);
        tracing::debug!(target: LOG_TARGET, "id={}, authenticated", self.id);
        Ok(())
    }

    /// Guard for privileged handlers.
    pub fn require(&self, level: AccessLevel) -> Result<()> {
        let current = self.access_level();
        if current >= level {
            return Ok(());
        }
        match level {
            AccessLevel::Authenticated if current == AccessLevel::Established => {
                Err(NetError::NotAuthenticated)
            },
            _ => Err(NetError::NotEstablished),
        }
    }

    fn start_keep_alive(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.shut || tasks.keep_alive.is_some() {
            return;
        }
        tasks.keep_alive = Some(supervisor::spawn_keep_alive(
            self.weak.clone(),
            self.config.keep_alive_interval,
        ));
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// The transport is live. Servers open the handshake here.
    pub fn on_connected(&self) {
        tracing::debug!(target: LOG_TARGET, "id={}, on_connected()", self.id);

        if self.role == Role::Server {
            let offer = Frame::offer(self.id, Some(self.config.keep_alive_interval));
            if let Err(e) = self.send_frame(&offer) {
                tracing::warn!(target: LOG_TARGET, "id={}, Failed to send offer: {}", self.id, e);
            }
        }
    }

    /// Decode inbound bytes and act on every complete frame, in order.
    ///
    /// Undecodable data closes the session with
    /// [`CloseReason::InvalidMessage`].
    pub fn process_data(&self, data: &[u8]) {
        if !self.is_open() {
            return;
        }

        let decoded = self.engine.lock().decode(data);
        match decoded {
            Ok(frames) => {
                for frame in frames {
                    if !self.is_open() {
                        break;
                    }
                    self.handle_frame(frame);
                }
            },
            Err(e) => self.on_invalid_packet(&e),
        }
    }

    fn handle_frame(&self, frame: Frame) {
        tracing::trace!(target: LOG_TARGET, "id={}, frame {}", self.id, frame.name());

        if frame.is_heartbeat() {
            self.mark_alive();
        }
        if let Some(interval) = frame.announced_keep_alive() {
            self.record_peer_keep_alive(interval);
        }

        match (self.role, frame) {
            (Role::Client, Frame::SessionOffer { session_id, .. }) => {
                let accept = Frame::accept(session_id, Some(self.config.keep_alive_interval));
                if let Err(e) = self.send_frame(&accept) {
                    tracing::warn!(target: LOG_TARGET, "id={}, Failed to accept offer: {}", self.id, e);
                    return;
                }
                self.on_established();
            },
            (Role::Server, Frame::SessionAccept { session_id, .. }) if session_id == self.id => {
                self.on_established();
            },
            (Role::Server, Frame::SessionAccept { session_id, .. }) => {
                self.on_invalid_message(&format!("accept for foreign session id {session_id}"));
            },
            (_, Frame::KeepAlive { uptime_ms, .. }) => {
                tracing::trace!(target: LOG_TARGET, "id={}, keep alive (uptime_ms={:?})", self.id, uptime_ms);
            },
            (_, Frame::Disconnect { code }) => match CloseReason::from_code(code) {
                Some(reason) => {
                    tracing::debug!(target: LOG_TARGET, "id={}, Peer disconnected: {}", self.id, reason);
                    self.close(reason);
                },
                None => self.on_invalid_message(&format!("disconnect with reserved code {code}")),
            },
            (_, Frame::Message(message)) => self.on_message(&message),
            (role, frame) => {
                self.on_invalid_message(&format!("unexpected {} on {role} session", frame.name()));
            },
        }
    }

    /// Route a decoded application message.
    ///
    /// Unknown kinds are logged and skipped unless the session runs with
    /// `close_on_unhandled`.
    pub fn on_message(&self, message: &Message) {
        tracing::debug!(target: LOG_TARGET, "id={}, on_message({:?})", self.id, message.kind);

        let result = match &self.dispatch {
            Some(table) => table.dispatch(self, message),
            None => Err(NetError::UnrecognizedMessageKind(message.kind.clone())),
        };

        match result {
            Ok(()) => {},
            Err(NetError::UnrecognizedMessageKind(kind)) => {
                tracing::warn!(target: LOG_TARGET, "id={}, No handler found: '{}'", self.id, kind);
                if self.config.close_on_unhandled {
                    self.close(CloseReason::UnhandledMessage);
                }
            },
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, "id={}, Handler for '{}' failed: {}", self.id, message.kind, e);
            },
        }
    }

    /// Decodable data that breaks the protocol rules.
    pub fn on_invalid_message(&self, error: &str) {
        tracing::warn!(target: LOG_TARGET, "id={}, Got an invalid message! ({})", self.id, error);
        self.close(CloseReason::InvalidMessage);
    }

    fn on_invalid_packet(&self, error: &NetError) {
        tracing::warn!(target: LOG_TARGET, "id={}, Got an invalid packet! ({})", self.id, error);
        self.close(CloseReason::InvalidMessage);
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Send an application message to the peer.
    pub fn send(&self, message: Message) -> Result<()> {
        self.send_frame(&Frame::Message(message))
    }

    /// Encode and write a frame.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        let transport = self.transport.lock().clone().ok_or(NetError::SessionClosed)?;
        let bytes = self.engine.lock().encode(frame)?;
        tracing::trace!(target: LOG_TARGET, "id={}, send {} ({} bytes)", self.id, frame.name(), bytes.len());
        transport.write(&bytes);
        Ok(())
    }

    pub(crate) fn send_keep_alive(&self) {
        let frame = self.keep_alive.frame(self.id);
        if let Err(e) = self.send_frame(&frame) {
            tracing::debug!(target: LOG_TARGET, "id={}, Keep alive not sent: {}", self.id, e);
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Close the session.
    ///
    /// Cancels the watchdog, then the keep-alive sender, then notifies the
    /// peer and closes the transport. Every step is skipped if already
    /// done, so calling this again is a no-op.
    pub fn close(&self, reason: CloseReason) {
        let (watchdog, keep_alive) = {
            let mut tasks = self.tasks.lock();
            tasks.shut = true;
            (tasks.watchdog.take(), tasks.keep_alive.take())
        };
        if let Some(task) = watchdog {
            task.cancel();
        }
        if let Some(task) = keep_alive {
            task.cancel();
        }

        let Some(transport) = self.transport.lock().take() else {
            return;
        };

        // close() may run more than once; only the call that releases the
        // transport logs.
        tracing::debug!(target: LOG_TARGET, "id={}, close({})", self.id, reason);
        *self.close_reason.lock() = Some(reason);

        let notice = self.engine.lock().encode(&Frame::Disconnect { code: reason.code() });
        match notice {
            Ok(bytes) => transport.write(&bytes),
            Err(e) => tracing::debug!(target: LOG_TARGET, "id={}, Disconnect not encoded: {}", self.id, e),
        }
        transport.close();
        self.closed.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("access_level", &self.access_level())
            .field("alive", &self.is_alive())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Session`] for one role.
pub struct SessionBuilder {
    role: Role,
    id: u16,
    config: SessionConfig,
    keep_alive: KeepAlivePolicy,
    dispatch: Option<Arc<DispatchTable>>,
    engine: Option<Box<dyn ProtocolEngine>>,
}

impl SessionBuilder {
    fn new(role: Role, id: u16) -> Self {
        let keep_alive = match role {
            Role::Server => KeepAlivePolicy::Server {
                started_at: tokio::time::Instant::now(),
            },
            Role::Client => KeepAlivePolicy::Client,
        };
        Self {
            role,
            id,
            config: SessionConfig::default(),
            keep_alive,
            dispatch: None,
            engine: None,
        }
    }

    /// Timing and policy.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep-alive payload policy.
    pub fn keep_alive(mut self, policy: KeepAlivePolicy) -> Self {
        self.keep_alive = policy;
        self
    }

    /// Enable message dispatch through `table`.
    pub fn dispatch(mut self, table: Arc<DispatchTable>) -> Self {
        self.dispatch = Some(table);
        self
    }

    /// Wire codec. Defaults to [`JsonLinesEngine`].
    pub fn engine(mut self, engine: Box<dyn ProtocolEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Create the session over `transport` and start its watchdog.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self, transport: Arc<dyn Transport>) -> Arc<Session> {
        let engine = self
            .engine
            .unwrap_or_else(|| Box::new(JsonLinesEngine::new()));

        let session = Arc::new_cyclic(|weak| Session {
            id: self.id,
            role: self.role,
            config: self.config,
            keep_alive: self.keep_alive,
            dispatch: self.dispatch,
            access_level: AtomicU8::new(AccessLevel::New as u8),
            alive: AtomicBool::new(false),
            last_heartbeat: Mutex::new(None),
            peer_keep_alive_ms: AtomicU64::new(0),
            engine: Mutex::new(engine),
            transport: Mutex::new(Some(transport)),
            tasks: Mutex::new(Tasks::default()),
            close_reason: Mutex::new(None),
            closed: CancellationToken::new(),
            weak: weak.clone(),
        });

        let watchdog = supervisor::spawn_watchdog(
            Arc::downgrade(&session),
            session.config.watchdog_interval,
            session.config.watchdog_mode,
        );
        session.tasks.lock().watchdog = Some(watchdog);

        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time;

    fn open(role: Role, id: u16, config: SessionConfig) -> (Arc<Session>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let session = Session::builder(role, id).config(config).build(transport.clone());
        (session, transport)
    }

    fn line(frame: &Frame) -> Vec<u8> {
        JsonLinesEngine::new().encode(frame).unwrap()
    }

    #[tokio::test]
    async fn test_new_session_state() {
        let (session, _transport) = open(Role::Server, 5, SessionConfig::default());
        assert_eq!(session.id(), 5);
        assert_eq!(session.access_level(), AccessLevel::New);
        assert!(!session.is_alive());
        assert!(session.is_open());
        assert!(session.is_watched());
        assert!(!session.is_keeping_alive());
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, transport) = open(Role::Server, 1, SessionConfig::default());
        session.on_established();

        session.close(CloseReason::InvalidMessage);
        let writes_after_first = transport.writes();
        session.close(CloseReason::SessionDied);

        assert_eq!(transport.close_count(), 1);
        assert_eq!(transport.writes(), writes_after_first);
        assert_eq!(session.close_reason(), Some(CloseReason::InvalidMessage));
        assert!(!session.is_open());
        assert!(!session.is_watched());
        assert!(!session.is_keeping_alive());
    }

    #[tokio::test]
    async fn test_close_notifies_peer() {
        let (session, transport) = open(Role::Client, 0, SessionConfig::default());
        session.close(CloseReason::application(4000).unwrap());
        assert_eq!(transport.frames().unwrap(), vec![Frame::Disconnect { code: 4000 }]);
    }

    #[tokio::test]
    async fn test_server_sends_offer_on_connect() {
        let (session, transport) = open(Role::Server, 42, SessionConfig::default());
        session.on_connected();

        let frames = transport.frames().unwrap();
        assert!(matches!(frames[..], [Frame::SessionOffer { session_id: 42, .. }]));
        assert_eq!(frames[0].announced_keep_alive(), Some(Duration::from_secs(60)));
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_client_accepts_offer_and_establishes() {
        let (session, transport) = open(Role::Client, 0, SessionConfig::default());
        session.on_connected();
        assert!(transport.writes().is_empty());

        session.process_data(&line(&Frame::offer(17, Some(Duration::from_secs(30)))));

        assert_eq!(session.access_level(), AccessLevel::Established);
        assert!(session.is_alive());
        assert!(session.is_keeping_alive());
        assert_eq!(session.peer_keep_alive_interval(), Some(Duration::from_secs(30)));
        assert_eq!(
            transport.frames().unwrap(),
            vec![Frame::accept(17, Some(Duration::from_secs(60)))]
        );
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_server_establishes_on_accept() {
        let (session, _transport) = open(Role::Server, 3, SessionConfig::default());
        session.process_data(&line(&Frame::accept(3, None)));
        assert!(session.is_established());
        assert!(session.is_keeping_alive());
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_accept_for_wrong_id_is_invalid() {
        let (session, _transport) = open(Role::Server, 3, SessionConfig::default());
        session.process_data(&line(&Frame::accept(4, None)));
        assert_eq!(session.close_reason(), Some(CloseReason::InvalidMessage));
    }

    #[tokio::test]
    async fn test_offer_on_server_is_invalid() {
        let (session, _transport) = open(Role::Server, 3, SessionConfig::default());
        session.process_data(&line(&Frame::offer(3, None)));
        assert_eq!(session.close_reason(), Some(CloseReason::InvalidMessage));
        assert_eq!(session.access_level(), AccessLevel::New);
    }

    #[tokio::test]
    async fn test_malformed_bytes_close_with_invalid_message() {
        let (session, transport) = open(Role::Server, 2, SessionConfig::default());
        session.process_data(b"\x00\x01garbage\n");

        assert!(!session.is_open());
        assert_eq!(session.close_reason(), Some(CloseReason::InvalidMessage));
        assert_eq!(transport.close_count(), 1);

        // Further data on a closed session is ignored.
        session.process_data(b"more garbage\n");
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_peer_disconnect_closes_with_its_reason() {
        let (session, transport) = open(Role::Client, 0, SessionConfig::default());
        session.process_data(&line(&Frame::Disconnect { code: 2 }));
        assert_eq!(session.close_reason(), Some(CloseReason::SessionDied));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_peer_disconnect_with_reserved_code_is_invalid() {
        let (session, _transport) = open(Role::Client, 0, SessionConfig::default());
        session.process_data(&line(&Frame::Disconnect { code: 100 }));
        assert_eq!(session.close_reason(), Some(CloseReason::InvalidMessage));
    }

    #[tokio::test]
    async fn test_access_level_never_reverts() {
        let (session, _transport) = open(Role::Server, 1, SessionConfig::default());
        assert!(matches!(session.authenticate(), Err(NetError::NotEstablished)));

        session.on_established();
        session.authenticate().unwrap();
        assert_eq!(session.access_level(), AccessLevel::Authenticated);

        // A late handshake confirmation must not demote the session.
        session.on_established();
        assert_eq!(session.access_level(), AccessLevel::Authenticated);

        session.close(CloseReason::SessionDied);
        assert_eq!(session.access_level(), AccessLevel::Authenticated);
        assert!(matches!(session.authenticate(), Err(NetError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_require_guard() {
        let (session, _transport) = open(Role::Server, 1, SessionConfig::default());
        assert!(session.require(AccessLevel::New).is_ok());
        assert!(matches!(session.require(AccessLevel::Established), Err(NetError::NotEstablished)));

        session.on_established();
        assert!(matches!(
            session.require(AccessLevel::Authenticated),
            Err(NetError::NotAuthenticated)
        ));
        session.authenticate().unwrap();
        assert!(session.require(AccessLevel::Authenticated).is_ok());
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_message_dispatch_and_reply() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let table = DispatchTable::builder()
            .on("Ping", move |session, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                session.send(Message::new("Pong"))
            })
            .build();

        let transport = Arc::new(MemoryTransport::new());
        let session = Session::builder(Role::Server, 8)
            .dispatch(table)
            .build(transport.clone());

        session.process_data(&line(&Message::new("Ping").into()));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.frames().unwrap(), vec![Frame::Message(Message::new("Pong"))]);
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_lenient_by_default() {
        let table = DispatchTable::builder().build();
        let transport = Arc::new(MemoryTransport::new());
        let session = Session::builder(Role::Server, 8)
            .dispatch(table)
            .build(transport.clone());

        session.process_data(&line(&Message::new("Unknown").into()));
        assert!(session.is_open());

        // Non-dispatching sessions are just as lenient.
        let (plain, _t) = open(Role::Server, 9, SessionConfig::default());
        plain.on_message(&Message::new("Unknown"));
        assert!(plain.is_open());

        session.close(CloseReason::SessionDied);
        plain.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_strict_mode_closes_on_unhandled_kind() {
        let (session, _transport) = open(Role::Server, 1, SessionConfig::default().strict());
        session.on_message(&Message::new("Unknown"));
        assert_eq!(session.close_reason(), Some(CloseReason::UnhandledMessage));
    }

    #[tokio::test]
    async fn test_handler_error_does_not_close() {
        let table = DispatchTable::builder()
            .on("Bad", |_, msg| msg.body::<u32>().map(|_| ()))
            .build();
        let transport = Arc::new(MemoryTransport::new());
        let session = Session::builder(Role::Client, 0)
            .dispatch(table)
            .build(transport);

        session.on_message(&Message::new("Bad"));
        assert!(session.is_open());
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (session, _transport) = open(Role::Client, 0, SessionConfig::default());
        session.close(CloseReason::SessionDied);
        assert!(matches!(session.send(Message::new("Hi")), Err(NetError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_established_after_close_starts_nothing() {
        let (session, _transport) = open(Role::Client, 0, SessionConfig::default());
        session.close(CloseReason::SessionDied);
        session.on_established();
        assert!(!session.is_keeping_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_dies_after_one_watchdog_interval() {
        let config = SessionConfig::default().with_watchdog_interval(Duration::from_secs(10));
        let (session, transport) = open(Role::Server, 1, config);

        time::sleep(Duration::from_millis(9_999)).await;
        assert!(session.is_open());

        time::sleep(Duration::from_millis(2)).await;
        assert!(!session.is_open());
        assert_eq!(session.close_reason(), Some(CloseReason::SessionDied));
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_mode_expires_stale_heartbeat() {
        let (session, _transport) = open(Role::Server, 1, SessionConfig::default());
        session.mark_alive();
        assert_eq!(session.heartbeat_timeout(), Duration::from_secs(120));

        // Checks every 10s read the flag without clearing it.
        time::sleep(Duration::from_secs(125)).await;
        assert!(session.is_open());
        assert!(session.is_alive());

        // The check at 130s finds the heartbeat older than the timeout.
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.close_reason(), Some(CloseReason::SessionDied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_mode_refreshed_by_keep_alives() {
        let (session, _transport) = open(Role::Server, 1, SessionConfig::default());
        session.process_data(&line(&Frame::accept(1, Some(Duration::from_secs(20)))));
        assert_eq!(session.heartbeat_timeout(), Duration::from_secs(40));

        for _ in 0..10 {
            time::sleep(Duration::from_secs(20)).await;
            session.process_data(&line(&Frame::KeepAlive {
                session_id: 1,
                uptime_ms: None,
            }));
        }
        assert!(session.is_open());

        time::sleep(Duration::from_secs(55)).await;
        assert_eq!(session.close_reason(), Some(CloseReason::SessionDied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_heartbeat_timeout_wins() {
        let config = SessionConfig::default().with_heartbeat_timeout(Duration::from_secs(15));
        let (session, _transport) = open(Role::Server, 1, config);
        session.process_data(&line(&Frame::accept(1, Some(Duration::from_secs(60)))));
        assert_eq!(session.heartbeat_timeout(), Duration::from_secs(15));

        time::sleep(Duration::from_secs(11)).await;
        assert!(session.is_open());
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.close_reason(), Some(CloseReason::SessionDied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_mode_needs_heartbeat_every_interval() {
        let config = SessionConfig::default().with_watchdog_mode(WatchdogMode::Consume);
        let (session, _transport) = open(Role::Server, 1, config);

        // Heartbeats every 5s keep the session open across several checks.
        for _ in 0..6 {
            session.mark_alive();
            time::sleep(Duration::from_secs(5)).await;
        }
        assert!(session.is_open());

        // Then silence: the next check consumes the last heartbeat, the one
        // after that finds the flag clear.
        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(session.close_reason(), Some(CloseReason::SessionDied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_keep_alive_count() {
        let config = SessionConfig::default().with_keep_alive_interval(Duration::from_secs(10));
        let (session, transport) = open(Role::Client, 0, config);
        session.process_data(&line(&Frame::offer(5, Some(Duration::from_secs(60)))));
        transport.clear();

        time::sleep(Duration::from_secs(35)).await;

        let keep_alives = transport
            .frames()
            .unwrap()
            .into_iter()
            .filter(|f| matches!(f, Frame::KeepAlive { uptime_ms: None, .. }))
            .count();
        assert_eq!(keep_alives, 3);
        session.close(CloseReason::SessionDied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_keep_alive_after_close() {
        let config = SessionConfig::default().with_keep_alive_interval(Duration::from_secs(1));
        let (session, transport) = open(Role::Server, 1, config);
        session.mark_alive();
        session.on_established();

        time::sleep(Duration::from_millis(2_500)).await;
        session.close(CloseReason::application(500).unwrap());
        let count = transport.writes().len();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.writes().len(), count);
        // Two keep-alives, then the disconnect notice.
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_closed_future_resolves() {
        let (session, _transport) = open(Role::Client, 0, SessionConfig::default());
        let waiter = session.clone();
        let handle = tokio::spawn(async move { waiter.closed().await });
        session.close(CloseReason::SessionDied);
        handle.await.unwrap();
    }
}
