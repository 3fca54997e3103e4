//! Per-source rate limiting over a rolling 60-second window.
//!
//! Each source has an independent grant log; [`RateLimiter::acquire`]
//! suspends the caller (via `tokio::time::sleep`, never spinning) until
//! admitting it would keep the source at or under its per-minute limit.
//! A grant is only recorded once the caller is admitted, so a waiter
//! that is cancelled mid-sleep leaves no trace in the window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Length of the rolling window.
const WINDOW: Duration = Duration::from_secs(60);

type GrantLog = Arc<tokio::sync::Mutex<VecDeque<Instant>>>;

/// Suspending, per-source rate gate.
///
/// Shared via `Arc` between the dispatcher and any other caller making
/// direct source requests. Per-source state sits behind independent
/// async locks, so one source's backlog never delays another source's
/// `acquire`. The outer map lock is only held for map lookups, never
/// across a suspension point.
#[derive(Default)]
pub struct RateLimiter {
    sources: Mutex<HashMap<String, GrantLog>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, source_id: &str) -> GrantLog {
        let mut map = match self.sources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(source_id.to_string()).or_default().clone()
    }

    /// Suspends until one more call to `source_id` fits inside the
    /// rolling window, then records the grant.
    ///
    /// A `limit_per_minute` of `0` means unlimited: the call returns
    /// immediately and records nothing.
    pub async fn acquire(&self, source_id: &str, limit_per_minute: u32) {
        if limit_per_minute == 0 {
            return;
        }
        let log = self.log_for(source_id);
        loop {
            let wait = {
                let mut grants = log.lock().await;
                let now = Instant::now();
                while grants
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= WINDOW)
                {
                    grants.pop_front();
                }
                if (grants.len() as u32) < limit_per_minute {
                    grants.push_back(now);
                    return;
                }
                // Window is full; wait until the oldest grant ages out.
                match grants.front() {
                    Some(oldest) => WINDOW.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            tracing::trace!(source = source_id, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Drops the grant log for `source_id` (e.g. on unregistration).
    pub fn forget(&self, source_id: &str) {
        let mut map = match self.sources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(source_id);
    }
}
