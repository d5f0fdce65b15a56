//! Rolling-window rate limiting for message submission
//!
//! Admits at most `max_requests` actions per sliding window. Rejected
//! callers can query how long to wait until the oldest admitted action
//! leaves the window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default number of requests admitted per window
const DEFAULT_MAX_REQUESTS: usize = 10;

/// Default window length
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Thread-safe rolling-window rate limiter
///
/// Timestamps of admitted actions are retained and pruned lazily as the
/// window slides; the limiter never admits more than `max_requests`
/// actions whose timestamps fall inside one window.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` actions per `window`
    ///
    /// # Examples
    ///
    /// ```
    /// use nimbus::limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(3, Duration::from_secs(60));
    /// assert!(limiter.try_acquire());
    /// ```
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Attempt to admit one action
    ///
    /// Returns `true` and records the action when under the limit,
    /// `false` when the window is full.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap();
        Self::prune(&mut requests, now, self.window);

        if requests.len() < self.max_requests {
            requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest admitted action leaves the window
    ///
    /// Zero when nothing is recorded or the window already has room.
    pub fn remaining_wait(&self) -> Duration {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap();
        Self::prune(&mut requests, now, self.window);

        if requests.len() < self.max_requests {
            return Duration::ZERO;
        }

        match requests.front() {
            Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }

    /// The configured per-window limit
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Drop timestamps that have slid out of the window
    fn prune(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = requests.front() {
            if now.duration_since(*front) >= window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}
