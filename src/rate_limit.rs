//! Sliding-window rate limiting for the public registration endpoint.
//!
//! State lives in the shared [`AppState`](crate::shared::state::AppState)
//! rather than in any per-request ambient storage, so the limit holds across
//! handlers and is trivially resettable in tests.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt for `client` and reports whether it is allowed.
    /// Attempts older than the window are pruned on the way in, and clients
    /// with no attempts left in the window are dropped from the map so it
    /// does not grow without bound over a long-running process.
    pub fn check(&self, client: IpAddr) -> bool {
        let now = Instant::now();
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            // A poisoned map only ever under-counts; let the request through.
            Err(poisoned) => poisoned.into_inner(),
        };
        hits.retain(|_, stamps| {
            stamps.retain(|t| now.duration_since(*t) < self.window);
            !stamps.is_empty()
        });
        let entries = hits.entry(client).or_default();
        if entries.len() >= self.max_attempts as usize {
            return false;
        }
        entries.push(now);
        true
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        match self.hits.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
