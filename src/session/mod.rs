//! Session lifecycle and liveness supervision.
//!
//! A [`Session`] wraps one transport and walks a one-way state machine:
//!
//! ```text
//!   NEW ──(handshake)──▶ ESTABLISHED ──(authenticate)──▶ AUTHENTICATED
//!    │                        │                               │
//!    └────────────────────────┴───────── close(reason) ───────┘
//!                                            │
//!                                          CLOSED
//! ```
//!
//! Two periodic tasks supervise an open session:
//!
//! - the **watchdog** runs from creation and closes the session with
//!   [`CloseReason::SessionDied`] once no heartbeat has arrived within the
//!   heartbeat timeout;
//! - the **keep-alive** sender runs from ESTABLISHED and emits a
//!   `KEEP_ALIVE` frame every interval.
//!
//! Closing cancels both and releases the transport exactly once.

mod config;
mod lifecycle;
mod state;
mod supervisor;

pub use config::{
    SessionConfig, WatchdogMode, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_WATCHDOG_INTERVAL,
    HEARTBEAT_TIMEOUT_FACTOR,
};
pub use lifecycle::{Session, SessionBuilder};
pub use state::{AccessLevel, ApplicationCode, CloseReason, Role, APPLICATION_CODE_MIN};
pub use supervisor::{elapsed_millis, KeepAlivePolicy};
