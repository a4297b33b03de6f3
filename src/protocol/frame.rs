//! Frames exchanged between peers.
//!
//! Control frames drive the handshake, keep-alives and close
//! notifications. `MESSAGE` frames carry application messages that the
//! session routes through its dispatch table.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A single decoded unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// Server → client, sent as soon as the transport is live.
    SessionOffer {
        /// Id the server allocated for this session
        session_id: u16,
        /// Offer time (Unix millis)
        timestamp: u64,
        /// Server keep-alive interval in milliseconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keep_alive_ms: Option<u64>,
    },
    /// Client → server, completes the handshake.
    SessionAccept {
        /// Id echoed back from the offer
        session_id: u16,
        /// Client keep-alive interval in milliseconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        keep_alive_ms: Option<u64>,
    },
    /// Periodic liveness signal.
    KeepAlive {
        /// Sender's view of the session id
        session_id: u16,
        /// Milliseconds since server startup (server keep-alives only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uptime_ms: Option<u64>,
    },
    /// Close notification carrying a reason code.
    Disconnect {
        /// Numeric close reason
        code: u16,
    },
    /// Application message.
    Message(Message),
}

impl Frame {
    /// Create a SESSION_OFFER frame stamped with the current time
    pub fn offer(session_id: u16, keep_alive: Option<Duration>) -> Self {
        Self::SessionOffer {
            session_id,
            timestamp: current_timestamp(),
            keep_alive_ms: keep_alive.map(duration_millis),
        }
    }

    /// Create a SESSION_ACCEPT frame answering an offer
    pub fn accept(session_id: u16, keep_alive: Option<Duration>) -> Self {
        Self::SessionAccept {
            session_id,
            keep_alive_ms: keep_alive.map(duration_millis),
        }
    }

    /// Keep-alive interval the sender announced during the handshake
    pub fn announced_keep_alive(&self) -> Option<Duration> {
        match self {
            Self::SessionOffer { keep_alive_ms, .. } | Self::SessionAccept { keep_alive_ms, .. } => {
                keep_alive_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
            }
            _ => None,
        }
    }

    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionOffer { .. } => "SESSION_OFFER",
            Self::SessionAccept { .. } => "SESSION_ACCEPT",
            Self::KeepAlive { .. } => "KEEP_ALIVE",
            Self::Disconnect { .. } => "DISCONNECT",
            Self::Message(_) => "MESSAGE",
        }
    }

    /// Whether this frame proves the peer is still there
    pub fn is_heartbeat(&self) -> bool {
        matches!(
            self,
            Self::SessionOffer { .. } | Self::SessionAccept { .. } | Self::KeepAlive { .. }
        )
    }
}

/// Application message routed by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind, the dispatch table key
    pub kind: String,
    /// Message body
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    /// Create a message with an empty payload
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Null,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize a value into the payload
    pub fn with_body<T: Serialize>(kind: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self::new(kind).with_payload(serde_json::to_value(body)?))
    }

    /// Deserialize the payload into a typed body
    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::Message(message)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Get current timestamp in milliseconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
