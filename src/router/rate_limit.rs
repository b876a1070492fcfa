//! Chat rate limiting
//!
//! One bounded ring of send timestamps per connection. A message is
//! admitted when fewer than `limit` sends happened within the window.

use std::collections::VecDeque;

/// Sliding-window rate limiter for one connection.
#[derive(Debug)]
pub struct ChatRateLimiter {
    stamps: VecDeque<u64>,
    limit: usize,
    window_ms: u64,
}

impl ChatRateLimiter {
    /// Limiter admitting `limit` sends per `window_ms`.
    #[must_use]
    pub fn new(limit: usize, window_ms: u64) -> Self {
        Self {
            stamps: VecDeque::with_capacity(limit),
            limit: limit.max(1),
            window_ms,
        }
    }

    /// Try to admit a send at `now_ms`. Admitted sends are recorded.
    pub fn try_admit(&mut self, now_ms: u64) -> bool {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.stamps.front().is_some_and(|&t| t < cutoff) {
            self.stamps.pop_front();
        }
        if self.stamps.len() >= self.limit {
            return false;
        }
        self.stamps.push_back(now_ms);
        true
    }
}
