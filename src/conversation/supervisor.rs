//! Periodic reaper for ended and overdue sessions.
//!
//! Sessions normally deregister themselves during teardown. The supervisor
//! catches what slips through: ended sessions still registered, and sessions
//! that outlived their maximum duration without ending.

use crate::conversation::registry::SessionMap;
use crate::conversation::types::EndReason;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Ended sessions removed.
    pub ended: usize,
    /// Overdue sessions cancelled and removed.
    pub expired: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.ended + self.expired
    }
}

pub(crate) struct LifecycleSupervisor {
    sessions: SessionMap,
    interval: Duration,
    token: CancellationToken,
}

impl LifecycleSupervisor {
    pub(crate) fn new(sessions: SessionMap, interval: Duration, token: CancellationToken) -> Self {
        Self {
            sessions,
            interval,
            token,
        }
    }

    /// Runs until the token is cancelled.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = sweep(&self.sessions);
                    if report.removed() > 0 {
                        info!(ended = report.ended, expired = report.expired, "Swept sessions");
                    }
                }
            }
        }
        debug!("Lifecycle supervisor stopped");
    }
}

/// Removes ended sessions and cancels overdue ones. Idempotent.
///
/// Session state is inspected on a snapshot taken under the read lock; the
/// write lock is held only for the removals.
pub(crate) fn sweep(sessions: &SessionMap) -> SweepReport {
    let snapshot: Vec<_> = sessions
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .cloned()
        .collect();

    let mut report = SweepReport::default();
    let mut doomed = Vec::new();
    for handle in snapshot {
        if handle.is_ended() {
            report.ended += 1;
            doomed.push(handle);
        } else if handle.end_time().is_none() && handle.elapsed() > handle.config().max_duration {
            debug!(id = %handle.id(), "Session exceeded maximum duration");
            handle.shared.cancel(EndReason::Expired);
            report.expired += 1;
            doomed.push(handle);
        }
    }

    if !doomed.is_empty() {
        let mut map = sessions.write().unwrap_or_else(PoisonError::into_inner);
        for handle in doomed {
            let registered = map
                .get(handle.id())
                .is_some_and(|current| current.same_session(&handle));
            if registered {
                map.remove(handle.id());
            }
        }
    }

    report
}
