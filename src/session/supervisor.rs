//! Periodic per-session tasks: keep-alive sender and liveness watchdog.
//!
//! Both tasks hold only a weak reference to their session and stop on
//! their own once it is dropped. Cancellation is cooperative: a task
//! suspended in its tick is simply never resumed.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Session, WatchdogMode};
use crate::protocol::Frame;

/// What a session puts in its outbound keep-alives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlivePolicy {
    /// Server keep-alives carry the elapsed time since server startup.
    Server {
        /// When the owning server started
        started_at: Instant,
    },
    /// Client keep-alives carry no payload.
    Client,
}

impl KeepAlivePolicy {
    /// Build the keep-alive frame for `session_id`.
    pub fn frame(&self, session_id: u16) -> Frame {
        let uptime_ms = match self {
            KeepAlivePolicy::Server { started_at } => Some(elapsed_millis(*started_at)),
            KeepAlivePolicy::Client => None,
        };
        Frame::KeepAlive {
            session_id,
            uptime_ms,
        }
    }
}

/// Milliseconds since `since`, truncated.
///
/// Monotonic because [`Instant`] is.
pub fn elapsed_millis(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Handle to a spawned periodic task.
#[derive(Debug)]
pub(crate) struct PeriodicTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Request cancellation. Returns immediately.
    pub(crate) fn cancel(self) {
        self.cancel.cancel();
        drop(self.handle);
    }
}

fn ticker(period: Duration) -> time::Interval {
    // First tick one full period from now, not immediately.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Send a keep-alive every `interval` until cancelled.
pub(crate) fn spawn_keep_alive(session: Weak<Session>, interval: Duration) -> PeriodicTask {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = ticker(interval);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(session) = session.upgrade() else { break };
                    session.send_keep_alive();
                }
            }
        }
    });

    PeriodicTask { cancel, handle }
}

/// Check the session's liveness every `interval`, closing it the first
/// time a check fails.
pub(crate) fn spawn_watchdog(
    session: Weak<Session>,
    interval: Duration,
    mode: WatchdogMode,
) -> PeriodicTask {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = ticker(interval);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(session) = session.upgrade() else { break };
                    if !session.check_alive(mode) {
                        session.on_timeout();
                        break;
                    }
                }
            }
        }
    });

    PeriodicTask { cancel, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_server_keep_alive_carries_uptime() {
        let started_at = Instant::now();
        time::advance(Duration::from_millis(1234)).await;

        let frame = KeepAlivePolicy::Server { started_at }.frame(9);
        assert_eq!(
            frame,
            Frame::KeepAlive {
                session_id: 9,
                uptime_ms: Some(1234)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_is_monotonic() {
        let started_at = Instant::now();
        let mut last = 0;
        for _ in 0..20 {
            time::advance(Duration::from_micros(700)).await;
            let now = elapsed_millis(started_at);
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 14);
    }

    #[test]
    fn test_client_keep_alive_has_no_uptime() {
        assert_eq!(
            KeepAlivePolicy::Client.frame(0),
            Frame::KeepAlive {
                session_id: 0,
                uptime_ms: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_session_dropped() {
        let task = spawn_keep_alive(Weak::new(), Duration::from_secs(1));
        time::sleep(Duration::from_secs(2)).await;
        assert!(task.handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_suspended_task() {
        let task = spawn_watchdog(Weak::new(), Duration::from_secs(3600), WatchdogMode::Observe);
        let token = task.cancel.clone();
        task.cancel();
        assert!(token.is_cancelled());
    }
}
