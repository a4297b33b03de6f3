//! Session state enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the connection a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepted by a listening server
    Server,
    /// Initiated by a client
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Coarse access gate. Only ever moves forward while a session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AccessLevel {
    /// Transport connected, handshake pending
    New = 0,
    /// Handshake complete
    Established = 1,
    /// Elevated by the application
    Authenticated = 2,
}

impl AccessLevel {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => AccessLevel::New,
            1 => AccessLevel::Established,
            _ => AccessLevel::Authenticated,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::New => write!(f, "NEW"),
            AccessLevel::Established => write!(f, "ESTABLISHED"),
            AccessLevel::Authenticated => write!(f, "AUTHENTICATED"),
        }
    }
}

/// Lowest code available to applications. Everything below is reserved.
pub const APPLICATION_CODE_MIN: u16 = 256;

/// Close code chosen by the application, always outside the reserved range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApplicationCode(u16);

impl ApplicationCode {
    /// Accept `code` if it is at least [`APPLICATION_CODE_MIN`]
    pub const fn new(code: u16) -> Option<Self> {
        if code >= APPLICATION_CODE_MIN {
            Some(Self(code))
        } else {
            None
        }
    }

    /// Raw code value
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ApplicationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a session was closed.
///
/// | Reason             | Code     |
/// |--------------------|----------|
/// | `InvalidMessage`   | 1        |
/// | `SessionDied`      | 2        |
/// | `UnhandledMessage` | 3        |
/// | `Application(c)`   | `c ≥ 256`|
///
/// Every reason maps to a distinct code, so [`CloseReason::from_code`]
/// inverts [`CloseReason::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Inbound data could not be decoded, or broke the handshake rules
    InvalidMessage,
    /// Liveness timeout or transport loss
    SessionDied,
    /// No handler bound for a message kind (strict dispatch only)
    UnhandledMessage,
    /// Protocol-specific application closure
    Application(ApplicationCode),
}

impl CloseReason {
    /// Application closure with `code`, or `None` for a reserved code
    pub const fn application(code: u16) -> Option<Self> {
        match ApplicationCode::new(code) {
            Some(code) => Some(CloseReason::Application(code)),
            None => None,
        }
    }

    /// Numeric code carried by DISCONNECT frames
    pub fn code(self) -> u16 {
        match self {
            CloseReason::InvalidMessage => 1,
            CloseReason::SessionDied => 2,
            CloseReason::UnhandledMessage => 3,
            CloseReason::Application(code) => code.get(),
        }
    }

    /// Map a DISCONNECT code back to a reason; `None` for unassigned codes
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(CloseReason::InvalidMessage),
            2 => Some(CloseReason::SessionDied),
            3 => Some(CloseReason::UnhandledMessage),
            other => CloseReason::application(other),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::InvalidMessage => write!(f, "INVALID_MESSAGE"),
            CloseReason::SessionDied => write!(f, "SESSION_DIED"),
            CloseReason::UnhandledMessage => write!(f, "UNHANDLED_MESSAGE"),
            CloseReason::Application(code) => write!(f, "APPLICATION({code})"),
        }
    }
}
