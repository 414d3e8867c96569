/**
 * Per-Key Rate Limiter
 *
 * Sliding-window limiter over request timestamps, keyed by API-key id.
 * Requests past the ceiling are rejected immediately with the number of
 * seconds until the oldest recorded hit leaves the window; nothing is
 * queued. Bookkeeping is one mutex-guarded map, pruned on every check.
 */

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    hits: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn per_minute(max: u32) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key`. `Err(retry_after_secs)` when the
    /// window is already full; the request is not recorded in that case.
    pub fn check(&self, key: Uuid) -> Result<(), u64> {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap();
        let window = hits.entry(key).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() as u32 >= self.max_per_window {
            let oldest = window.front().copied().unwrap_or(now);
            let until_free = self.window.saturating_sub(now.duration_since(oldest));
            return Err(until_free.as_secs().max(1));
        }

        window.push_back(now);
        Ok(())
    }
}
