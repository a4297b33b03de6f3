//! Wire protocol: frames and the engines that encode them.
//!
//! The session layer never touches raw bytes itself. It hands inbound data
//! to a [`ProtocolEngine`], acts on the decoded [`Frame`]s, and asks the
//! same engine to encode outbound frames.
//!
//! ## Message Flow
//!
//! ```text
//! Client                                Server
//!    |                                    |
//!    |<------- SESSION_OFFER (id) --------|  Transport live, id allocated
//!    |-------- SESSION_ACCEPT (id) ------>|  Both sides ESTABLISHED
//!    |                                    |
//!    |-------- KEEP_ALIVE --------------->|  Every client interval
//!    |<------- KEEP_ALIVE (uptime_ms) ----|  Every server interval
//!    |                                    |
//!    |======== MESSAGE (kind) ===========>|  Routed by dispatch table
//!    |<======= MESSAGE (kind) ============|
//!    |                                    |
//!    |-------- DISCONNECT (code) -------->|  Either side closes
//! ```
//!
//! ## Engines
//!
//! | Engine            | Framing                         |
//! |-------------------|---------------------------------|
//! | `JsonLinesEngine` | One JSON object per `\n` line   |
//!
//! Custom engines implement [`ProtocolEngine`] and are installed on an
//! endpoint through an [`EngineFactory`].

mod engine;
mod frame;

pub use engine::{
    default_engine_factory, EngineFactory, JsonLinesEngine, ProtocolEngine,
    DEFAULT_MAX_FRAME_SIZE,
};
pub use frame::{Frame, Message};
