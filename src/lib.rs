//! # KI Net - Session Lifecycle for Persistent Connections
//!
//! Session layer for long-lived client/server connections: identifier
//! allocation, a one-way session state machine, keep-alive emission,
//! liveness supervision, and message routing.
//!
//! ## Features
//!
//! - **Session ids**: bounded pool `[1, 65535]`, smallest free id first,
//!   released on disconnect for immediate reuse
//! - **Lifecycle**: NEW → ESTABLISHED → AUTHENTICATED, idempotent close
//!   reachable from every state
//! - **Liveness**: per-session watchdog and keep-alive tasks, cancelled
//!   before the transport is released
//! - **Dispatch**: immutable kind → handler table shared by all sessions
//! - **Endpoints**: TCP server and client over tokio
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                         Server
//!    |                              |
//!    |<----- SESSION_OFFER (id) ----|  connection accepted, id allocated
//!    |------ SESSION_ACCEPT (id) -->|  both sides ESTABLISHED
//!    |                              |  (both announce their keep-alive)
//!    |                              |
//!    |<===== KEEP_ALIVE ===========>|  every keep-alive interval
//!    |<===== MESSAGE (kind) =======>|  routed by the dispatch table
//!    |                              |
//!    |------ DISCONNECT (code) ---->|  either side
//! ```
//!
//! ### State Machine
//!
//! ```text
//!     [NEW] ───on_established()───> [ESTABLISHED] ───authenticate()───> [AUTHENTICATED]
//!       │                                 │                                   │
//!       └─────────────── close(reason) ───┴───────────────────────────────────┘
//!                               │
//!                           [CLOSED]
//! ```
//!
//! ### Close Reasons
//!
//! | Reason              | Code | Trigger                                 |
//! |---------------------|------|-----------------------------------------|
//! | `INVALID_MESSAGE`   | 1    | Undecodable bytes, handshake violation  |
//! | `SESSION_DIED`      | 2    | Watchdog timeout, transport loss        |
//! | `UNHANDLED_MESSAGE` | 3    | Unbound kind with strict dispatch       |
//! | `APPLICATION(c)`    | `c`  | Application-defined, `c ≥ 256`          |
//!
//! ## Quick Start
//!
//! ### Server
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kinet::{config::ServerConfig, DispatchTable, Message, Server};
//!
//! let table = DispatchTable::builder()
//!     .on("Ping", |session, _| session.send(Message::new("Pong")))
//!     .build();
//!
//! let server = Arc::new(Server::new(ServerConfig::default().with_port(7000))?.with_dispatch(table));
//! server.run().await?;
//! ```
//!
//! ### Client
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kinet::{config::ClientConfig, Client, Message};
//!
//! let client = Arc::new(Client::new(ClientConfig::default().with_port(7000))?);
//! let session = client.connect().await?;
//! session.send(Message::new("Ping"))?;
//! session.closed().await;
//! ```
//!
//! ## Modules
//!
//! - [`allocator`]: Session id pool
//! - [`session`]: Session state machine and periodic tasks
//! - [`dispatch`]: Message kind routing
//! - [`endpoint`]: Server, client and connection coordinator
//! - [`protocol`]: Frames and protocol engines
//! - [`transport`]: TCP and in-memory transports
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod allocator;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use allocator::{AllocationError, IdAllocator};
pub use config::Config;
pub use dispatch::{DispatchTable, DispatchTableBuilder, Handler};
pub use endpoint::{Client, Coordinator, Endpoint, Server};
pub use error::{NetError, Result};
pub use protocol::{Frame, JsonLinesEngine, Message, ProtocolEngine};
pub use session::{AccessLevel, ApplicationCode, CloseReason, Role, Session, SessionConfig, WatchdogMode};
pub use transport::{MemoryTransport, TcpTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
