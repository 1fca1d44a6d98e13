//! Per-adapter circuit breaker.
//!
//! `Closed → Open → HalfOpen → Closed | Open`. A call must hold a
//! [`CircuitPermit`]; reporting its outcome is the only way state moves.
//! In HalfOpen exactly one permit (the trial) is outstanding. A trial
//! permit dropped without an outcome frees the slot for the next caller.

use dashmap::DashMap;
use parking_lot::Mutex;
use relay_config::CircuitConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_ms_ago: Option<u64>,
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    failure_count: u32,
    streak_started: Option<Instant>,
    last_failure_at: Option<Instant>,
    opened_until: Option<Instant>,
    cooldown: Duration,
    trial_in_flight: bool,
}

impl Breaker {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            streak_started: None,
            last_failure_at: None,
            opened_until: None,
            cooldown,
            trial_in_flight: false,
        }
    }

    fn open(&mut self, adapter: &str, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_until = Some(now + self.cooldown);
        self.trial_in_flight = false;
        metrics::counter!("relay_circuit_open_total", "adapter" => adapter.to_string()).increment(1);
        warn!(adapter, failures = self.failure_count, cooldown = ?self.cooldown, "circuit opened");
    }

    fn close(&mut self, base_cooldown: Duration) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.streak_started = None;
        self.opened_until = None;
        self.cooldown = base_cooldown;
        self.trial_in_flight = false;
    }
}

pub struct CircuitBreaker {
    config: CircuitConfig,
    breakers: DashMap<String, Arc<Mutex<Breaker>>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn cell(&self, adapter: &str) -> Arc<Mutex<Breaker>> {
        if let Some(cell) = self.breakers.get(adapter) {
            return cell.value().clone();
        }
        self.breakers
            .entry(adapter.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Breaker::new(self.config.cooldown))))
            .value()
            .clone()
    }

    /// Ask to call the adapter. `Err` carries how long until a trial is allowed.
    pub fn acquire(&self, adapter: &str) -> Result<CircuitPermit, Duration> {
        let cell = self.cell(adapter);
        let now = Instant::now();
        let trial = {
            let mut b = cell.lock();
            let state = b.state;
            match state {
                CircuitState::Closed => false,
                CircuitState::Open => {
                    let until = b.opened_until.unwrap_or(now);
                    if now < until {
                        return Err(until - now);
                    }
                    info!(adapter, "circuit half-open, admitting trial call");
                    b.state = CircuitState::HalfOpen;
                    b.trial_in_flight = true;
                    true
                }
                CircuitState::HalfOpen => {
                    if b.trial_in_flight {
                        return Err(Duration::ZERO);
                    }
                    b.trial_in_flight = true;
                    true
                }
            }
        };
        Ok(CircuitPermit {
            adapter: adapter.to_string(),
            cell,
            config: self.config,
            trial,
            settled: false,
        })
    }

    pub fn snapshot(&self, adapter: &str) -> CircuitSnapshot {
        let Some(cell) = self.breakers.get(adapter).map(|c| c.value().clone()) else {
            return CircuitSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
                retry_after_ms: None,
                last_failure_ms_ago: None,
            };
        };
        let b = cell.lock();
        let now = Instant::now();
        let (state, retry_after_ms) = match (b.state, b.opened_until) {
            (CircuitState::Open, Some(until)) if now >= until => (CircuitState::HalfOpen, None),
            (CircuitState::Open, Some(until)) => (CircuitState::Open, Some((until - now).as_millis() as u64)),
            (s, _) => (s, None),
        };
        CircuitSnapshot {
            state,
            failure_count: b.failure_count,
            retry_after_ms,
            last_failure_ms_ago: b.last_failure_at.map(|t| now.duration_since(t).as_millis() as u64),
        }
    }

    pub fn state(&self, adapter: &str) -> CircuitState {
        self.snapshot(adapter).state
    }
}

/// Admission to call an adapter. Report exactly one outcome.
#[must_use = "report the call outcome with success() or failure()"]
pub struct CircuitPermit {
    adapter: String,
    cell: Arc<Mutex<Breaker>>,
    config: CircuitConfig,
    trial: bool,
    settled: bool,
}

impl CircuitPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        let mut b = self.cell.lock();
        let state = b.state;
        match state {
            CircuitState::Closed => {
                b.failure_count = 0;
                b.streak_started = None;
            }
            CircuitState::HalfOpen if self.trial => {
                info!(adapter = %self.adapter, "trial succeeded, circuit closed");
                b.close(self.config.cooldown);
            }
            _ => {}
        }
    }

    pub fn failure(mut self) {
        self.settled = true;
        let now = Instant::now();
        let mut b = self.cell.lock();
        b.last_failure_at = Some(now);
        let state = b.state;
        match state {
            CircuitState::Closed => {
                let stale = b
                    .streak_started
                    .map_or(true, |start| now.duration_since(start) >= self.config.window);
                if stale {
                    b.failure_count = 0;
                    b.streak_started = Some(now);
                }
                b.failure_count += 1;
                if b.failure_count >= self.config.threshold {
                    b.open(&self.adapter, now);
                }
            }
            CircuitState::HalfOpen if self.trial => {
                b.cooldown = (b.cooldown * 2).min(self.config.max_cooldown.max(self.config.cooldown));
                b.open(&self.adapter, now);
            }
            _ => {}
        }
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        let mut b = self.cell.lock();
        if b.state == CircuitState::HalfOpen {
            b.trial_in_flight = false;
        }
    }
}
