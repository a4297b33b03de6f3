//! Server and client endpoints.
//!
//! An [`Endpoint`] is the factory and owner of its sessions. Each accepted
//! or initiated connection gets a [`Coordinator`] that translates
//! transport events into session lifecycle calls:
//!
//! ```text
//! transport            Coordinator                 Endpoint / Session
//!    │ connected  ───▶  connection_made  ───▶  create_session → on_connected
//!    │ bytes      ───▶  data_received    ───▶  session.process_data
//!    │ EOF/error  ───▶  connection_lost  ───▶  release_session, close(SESSION_DIED)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kinet::{config::ServerConfig, DispatchTable, Message, Server};
//!
//! let table = DispatchTable::builder()
//!     .on("Ping", |session, _| session.send(Message::new("Pong")))
//!     .build();
//! let server = Arc::new(Server::new(ServerConfig::default().with_port(7000))?.with_dispatch(table));
//! server.run().await?;
//! ```

mod client;
mod coordinator;
mod server;

pub use client::{Client, CLIENT_SESSION_ID};
pub use coordinator::Coordinator;
pub use server::Server;

use std::sync::Arc;

use crate::error::Result;
use crate::session::{Role, Session};
use crate::transport::Transport;

/// Either side of a connection, as seen by its coordinators.
pub trait Endpoint: Send + Sync {
    /// Which role sessions created here play.
    fn role(&self) -> Role;

    /// Wire up a session over a freshly connected transport.
    ///
    /// This is the one place a session's id, keep-alive interval, and
    /// dispatch table are assembled. Fails when no id is available or the
    /// endpoint has been shut down.
    fn create_session(&self, transport: Arc<dyn Transport>) -> Result<Arc<Session>>;

    /// Forget `session` and return its id, if the endpoint allocated one.
    fn release_session(&self, session: &Session);
}
