//! Per-client minimum interval between chat calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Entries kept before stale clients are evicted.
const CLEANUP_THRESHOLD: usize = 10_000;

/// Rejects a client that calls again before `window` has elapsed since its
/// last accepted call.
///
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
pub struct RateLimiter {
    window: Duration,
    clients: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// A zero window disables limiting.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_millis(window_ms: u64) -> Self {
        Self::new(Duration::from_millis(window_ms))
    }

    /// Returns `true` if the call is allowed and records it.
    pub fn check(&self, client_key: &str) -> bool {
        self.check_at(client_key, Instant::now())
    }

    fn check_at(&self, client_key: &str, now: Instant) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > CLEANUP_THRESHOLD {
            clients.retain(|_, last| now.duration_since(*last) < self.window);
        }

        match clients.get(client_key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                clients.insert(client_key.to_string(), now);
                true
            }
        }
    }

    /// Clients currently tracked.
    pub fn tracked(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
