//! Message kind → handler routing.
//!
//! A [`DispatchTable`] is built once at startup and shared read-only by
//! every session of an endpoint:
//!
//! ```rust,ignore
//! use kinet::{DispatchTable, Message};
//!
//! let table = DispatchTable::builder()
//!     .on("Ping", |session, _msg| session.send(Message::new("Pong")))
//!     .on("Chat", handle_chat)
//!     .build();
//! ```
//!
//! Registering a kind twice keeps the last handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{NetError, Result};
use crate::protocol::Message;
use crate::session::Session;

/// A message handler. Runs synchronously on the task that received the
/// message, so it must not block.
pub type Handler = Arc<dyn Fn(&Session, &Message) -> Result<()> + Send + Sync>;

/// Immutable mapping from message kind to handler.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Handler>,
}

impl DispatchTable {
    /// Start building a table.
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// Whether a handler is bound for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Number of bound kinds.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no kind is bound.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Bound kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Route `message` to its handler.
    ///
    /// Returns [`NetError::UnrecognizedMessageKind`] when nothing is bound
    /// for the kind, or the handler's own error.
    pub fn dispatch(&self, session: &Session, message: &Message) -> Result<()> {
        let Some(handler) = self.handlers.get(&message.kind) else {
            return Err(NetError::UnrecognizedMessageKind(message.kind.clone()));
        };
        handler(session, message)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Collects handler bindings before freezing them into a [`DispatchTable`].
#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<String, Handler>,
}

impl DispatchTableBuilder {
    /// Bind `handler` to `kind`, replacing any earlier binding.
    pub fn on<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Session, &Message) -> Result<()> + Send + Sync + 'static,
    {
        self.bind(kind, Arc::new(handler));
        self
    }

    /// Bind an already shared handler to `kind`, replacing any earlier binding.
    pub fn bind(&mut self, kind: impl Into<String>, handler: Handler) {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), handler).is_some() {
            tracing::debug!(target: "kinet::session", "Handler for '{}' replaced", kind);
        }
    }

    /// Freeze the bindings.
    pub fn build(self) -> Arc<DispatchTable> {
        Arc::new(DispatchTable {
            handlers: self.handlers,
        })
    }
}
