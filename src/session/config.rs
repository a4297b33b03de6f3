//! Per-session timing and policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default keep-alive interval for both roles.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);
/// Default liveness check interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);
/// Keep-alive intervals a peer may miss before its session is considered dead.
pub const HEARTBEAT_TIMEOUT_FACTOR: u32 = 2;

/// How the watchdog treats the liveness flag on each check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogMode {
    /// Check when the last heartbeat arrived without clearing anything.
    ///
    /// The session is alive while the most recent heartbeat is no older
    /// than [`SessionConfig::heartbeat_timeout`], or by default
    /// [`HEARTBEAT_TIMEOUT_FACTOR`] times the peer's keep-alive interval.
    #[default]
    Observe,
    /// Atomically read and clear the flag, requiring a fresh heartbeat in
    /// every interval.
    Consume,
}

/// Session configuration, filled in by the owning endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Period of outbound keep-alives once established
    pub keep_alive_interval: Duration,
    /// Period of liveness checks, starting at creation
    pub watchdog_interval: Duration,
    /// Liveness flag handling
    pub watchdog_mode: WatchdogMode,
    /// Close the session when a message kind has no handler
    pub close_on_unhandled: bool,
    /// Maximum heartbeat age in observe mode; derived from the peer's
    /// keep-alive interval when unset
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            watchdog_mode: WatchdogMode::Observe,
            close_on_unhandled: false,
            heartbeat_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Set keep-alive interval
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set watchdog interval
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Set watchdog mode
    pub fn with_watchdog_mode(mut self, mode: WatchdogMode) -> Self {
        self.watchdog_mode = mode;
        self
    }

    /// Set a fixed heartbeat timeout
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Close sessions on unhandled message kinds
    pub fn strict(mut self) -> Self {
        self.close_on_unhandled = true;
        self
    }
}
