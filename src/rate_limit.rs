//! Fixed-window request throttle keyed by (client, route)

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_WINDOW_SECS: i64 = 60;
pub const DEFAULT_MAX_REQUESTS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub window_secs: i64,
    pub max_requests: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    pub client_key: String,
    pub window_start: i64,
    pub count: u32,
}

pub struct RateLimiter {
    default_limit: RateLimit,
    route_limits: HashMap<String, RateLimit>,
    // One lock over every window: increment-and-compare is a single critical section.
    table: Mutex<WindowTable>,
}

#[derive(Default)]
struct WindowTable {
    windows: HashMap<(String, String), RateWindow>,
    last_sweep: Option<i64>,
}

impl RateLimiter {
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            default_limit,
            route_limits: HashMap::new(),
            table: Mutex::new(WindowTable::default()),
        }
    }

    pub fn with_route_limit(mut self, route: impl Into<String>, limit: RateLimit) -> Self {
        self.route_limits.insert(route.into(), limit);
        self
    }

    pub fn limit_for(&self, route_key: &str) -> RateLimit {
        self.route_limits
            .get(route_key)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Expired windows are swept at most once per shortest configured window.
    fn sweep_interval(&self) -> i64 {
        self.route_limits
            .values()
            .map(|l| l.window_secs)
            .fold(self.default_limit.window_secs, i64::min)
            .max(1)
    }

    /// Count one request and report whether it is within the limit.
    pub fn allow(&self, client_key: &str, route_key: &str, now: i64) -> bool {
        let limit = self.limit_for(route_key);
        let mut table = self.table.lock();

        let due = table
            .last_sweep
            .map_or(true, |last| now.saturating_sub(last) >= self.sweep_interval());
        if due {
            let dropped = self.sweep(&mut table.windows, now);
            table.last_sweep = Some(now);
            if dropped > 0 {
                debug!("Dropped {} expired rate-limit windows", dropped);
            }
        }

        let window = table
            .windows
            .entry((client_key.to_string(), route_key.to_string()))
            .or_insert_with(|| RateWindow {
                client_key: client_key.to_string(),
                window_start: now,
                count: 0,
            });

        if now >= window.window_start.saturating_add(limit.window_secs) {
            window.window_start = now;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        let allowed = window.count <= limit.max_requests;
        if !allowed {
            debug!(
                "Rate limit exceeded for {} on {} ({} > {})",
                client_key, route_key, window.count, limit.max_requests
            );
        }
        allowed
    }

    /// Drop windows that have already rolled over.
    fn sweep(&self, windows: &mut HashMap<(String, String), RateWindow>, now: i64) -> usize {
        let before = windows.len();
        windows.retain(|(_, route), w| {
            now < w.window_start.saturating_add(self.limit_for(route).window_secs)
        });
        before - windows.len()
    }

    pub fn tracked_windows(&self) -> usize {
        self.table.lock().windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimit::default())
    }
}
