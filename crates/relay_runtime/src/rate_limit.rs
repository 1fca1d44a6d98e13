//! Fixed-window rate limiting per (caller, adapter).
//!
//! A key's window starts at its first request. Check-and-increment happens
//! under the map's entry lock for that key, so concurrent requests from the
//! same caller cannot both take the last unit.

use dashmap::DashMap;
use relay_config::RateLimitConfig;
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u64 },
    Denied { reset_at: Instant, limit: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

pub struct RateLimiter {
    default: RateLimitConfig,
    overrides: HashMap<String, RateLimitConfig>,
    windows: DashMap<(String, String), Window>,
}

impl RateLimiter {
    pub fn new(default: RateLimitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            windows: DashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, RateLimitConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn config_for(&self, adapter: &str) -> RateLimitConfig {
        self.overrides.get(adapter).copied().unwrap_or(self.default)
    }

    pub fn allow(&self, caller: &str, adapter: &str) -> Decision {
        let cfg = self.config_for(adapter);
        let window = cfg.window();
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry((caller.to_string(), adapter.to_string()))
            .or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= window {
            *entry = Window { started: now, count: 0 };
        }

        if entry.count >= cfg.limit {
            return Decision::Denied {
                reset_at: entry.started + window,
                limit: cfg.limit,
            };
        }
        entry.count += 1;
        Decision::Allowed {
            remaining: cfg.limit - entry.count,
        }
    }

    /// Drop windows that have run out; their keys start fresh on next use.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|(_, adapter), w| now.duration_since(w.started) < self.config_for(adapter).window());
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
