//! Token bucket that smooths bursts of network fetches.
//!
//! Each admitted fetch spends one token. Tokens refill continuously at
//! `rate` per second up to `burst`. Fetches that find the bucket empty wait
//! in FIFO order; the coordinator asks [`RateLimiter::next_wakeup`] when to
//! try again and releases them with [`RateLimiter::release`].
//!
//! A waiting fetch that was cancelled in the meantime is skipped without
//! spending a token.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Default sustained fetch rate, per second.
pub const DEFAULT_RATE: f64 = 80.0;

/// Default bucket capacity.
pub const DEFAULT_BURST: u32 = 25;

pub(crate) struct RateLimiter<T> {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
    pending: VecDeque<T>,
}

impl<T> RateLimiter<T> {
    /// Starts with a full bucket.
    pub fn new(rate: f64, burst: u32, now: Instant) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: rate.max(0.001),
            burst,
            tokens: burst,
            last_refill: now,
            pending: VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// Admits `item` immediately if a token is available and nobody is
    /// waiting; otherwise queues it and returns `None`.
    pub fn admit(&mut self, item: T, now: Instant) -> Option<T> {
        self.refill(now);
        if self.pending.is_empty() && self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Some(item)
        } else {
            self.pending.push_back(item);
            None
        }
    }

    /// Releases as many waiting items as there are tokens, in order.
    /// Items for which `is_live` returns false are dropped for free.
    pub fn release(&mut self, now: Instant, is_live: impl Fn(&T) -> bool) -> Vec<T> {
        self.refill(now);
        let mut released = Vec::new();
        while let Some(front) = self.pending.front() {
            if !is_live(front) {
                self.pending.pop_front();
                continue;
            }
            if self.tokens < 1.0 {
                break;
            }
            self.tokens -= 1.0;
            if let Some(item) = self.pending.pop_front() {
                released.push(item);
            }
        }
        released
    }

    /// When the next waiting item can be released, if any are waiting.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let available = (self.tokens + elapsed * self.rate).min(self.burst);
        let deficit = 1.0 - available;
        if deficit <= 0.0 {
            Some(now)
        } else {
            Some(now + Duration::from_secs_f64(deficit / self.rate))
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
