//! Upstream call throttling.
//!
//! [`RateLimiter`] bounds the number of admitted calls inside any sliding
//! window. [`RequestPacer`] spaces consecutive symbol starts by a fixed delay.
//! Both run on `tokio::time`, so paused-clock tests drive them deterministically.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Admission grant for one outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    /// Time spent suspended before admission.
    pub waited: Duration,
}

/// Sliding-window limiter: at most `max_requests` admissions per `window`.
///
/// Waiters are served in arrival order. The lock is held across the wait so
/// admission and timestamp recording form one atomic step.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Suspend until a call may be admitted, then record it.
    pub async fn acquire(&self) -> Permit {
        let started = Instant::now();
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            self.evict_expired(&mut admitted, now);

            if admitted.len() < self.max_requests {
                admitted.push_back(now);
                return Permit {
                    waited: now.saturating_duration_since(started),
                };
            }

            // Full window: the oldest admission decides when a slot frees up.
            let Some(oldest) = admitted.front().copied() else {
                continue;
            };
            let ready_at = oldest + self.window;
            debug!(
                wait_ms = ready_at.saturating_duration_since(now).as_millis() as u64,
                in_window = admitted.len(),
                "rate limit reached, waiting for a permit"
            );
            sleep_until(ready_at).await;
        }
    }

    /// Like [`Self::acquire`], but gives up when `cancel` fires.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> Option<Permit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.acquire() => Some(permit),
        }
    }

    /// Number of admissions inside the current window.
    pub async fn current_load(&self) -> usize {
        let mut admitted = self.admitted.lock().await;
        self.evict_expired(&mut admitted, Instant::now());
        admitted.len()
    }

    fn evict_expired(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Keeps consecutive request starts at least `delay` apart across all workers.
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    last_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_slot: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Reserve the next start slot and sleep until it. Returns `false` if
    /// cancelled before the slot arrived.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        let slot = {
            let mut last_slot = self.last_slot.lock().await;
            let now = Instant::now();
            let slot = match *last_slot {
                Some(previous) => (previous + self.delay).max(now),
                None => now,
            };
            *last_slot = Some(slot);
            slot
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep_until(slot) => true,
        }
    }
}
