//! Gateway configuration, read from the environment.
//!
//! Process-wide strings are `lazy_static` globals; the structured set used
//! to wire the runtime is built by [`GatewayConfig::from_env`]. Values that
//! fail to parse fall back to their defaults and are reported back in
//! [`GatewayConfig::warnings`] so the binary can log them.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

lazy_static! {
    pub static ref GATE_URL: String =
        std::env::var("RELAY_GATE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fixed-window quota: `limit` requests per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window_secs: window.as_secs().max(1),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Failures within `window` that open the circuit.
    pub threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
    /// Upper bound for the doubled cooldown after failed trials.
    pub max_cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bind: String,
    pub adapters_dir: PathBuf,
    pub audit_path: PathBuf,
    pub credentials_path: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub rate_limit: RateLimitConfig,
    /// Per-adapter overrides of `rate_limit`.
    pub adapter_limits: HashMap<String, RateLimitConfig>,
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    pub upstream_timeout: Duration,
    pub refresh_timeout: Duration,
    pub audit_timeout: Duration,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
            adapters_dir: PathBuf::from("adapters"),
            audit_path: PathBuf::from("audit/audit.jsonl"),
            credentials_path: None,
            metrics_addr: None,
            rate_limit: RateLimitConfig::default(),
            adapter_limits: HashMap::new(),
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
            upstream_timeout: Duration::from_millis(10_000),
            refresh_timeout: Duration::from_millis(5_000),
            audit_timeout: Duration::from_millis(2_000),
            warnings: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (the environment in production).
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = Vars {
            lookup,
            warnings: Vec::new(),
        };
        let d = Self::default();

        let rate_limit = RateLimitConfig {
            limit: vars.parse("RELAY_RATE_LIMIT", d.rate_limit.limit),
            window_secs: vars.parse("RELAY_RATE_WINDOW_SECS", d.rate_limit.window_secs).max(1),
        };
        let circuit = CircuitConfig {
            threshold: vars.parse("RELAY_CB_THRESHOLD", d.circuit.threshold).max(1),
            window: Duration::from_secs(vars.parse("RELAY_CB_WINDOW_SECS", d.circuit.window.as_secs())),
            cooldown: Duration::from_secs(vars.parse("RELAY_CB_COOLDOWN_SECS", d.circuit.cooldown.as_secs())),
            max_cooldown: Duration::from_secs(
                vars.parse("RELAY_CB_MAX_COOLDOWN_SECS", d.circuit.max_cooldown.as_secs()),
            ),
        };
        let retry = RetryConfig {
            max_attempts: vars.parse("RELAY_RETRY_ATTEMPTS", d.retry.max_attempts).max(1),
            base_delay: Duration::from_millis(vars.parse("RELAY_RETRY_BASE_MS", 100)),
            max_delay: Duration::from_millis(vars.parse("RELAY_RETRY_MAX_MS", 2000)),
        };

        let adapter_limits = match vars.get("RELAY_LIMITS") {
            Some(path) => load_limits(&path)?,
            None => HashMap::new(),
        };

        Ok(Self {
            bind: vars.get("RELAY_BIND").unwrap_or(d.bind),
            adapters_dir: vars.get("RELAY_ADAPTERS_DIR").map(PathBuf::from).unwrap_or(d.adapters_dir),
            audit_path: vars.get("RELAY_AUDIT_PATH").map(PathBuf::from).unwrap_or(d.audit_path),
            credentials_path: vars.get("RELAY_CREDENTIALS").map(PathBuf::from),
            metrics_addr: vars.get("RELAY_METRICS_ADDR"),
            rate_limit,
            adapter_limits,
            circuit,
            retry,
            upstream_timeout: Duration::from_millis(vars.parse("RELAY_UPSTREAM_TIMEOUT_MS", 10_000)),
            refresh_timeout: Duration::from_millis(vars.parse("RELAY_REFRESH_TIMEOUT_MS", 5_000)),
            audit_timeout: Duration::from_millis(vars.parse("RELAY_AUDIT_TIMEOUT_MS", 2_000)),
            warnings: vars.warnings,
        })
    }

    /// Effective quota for an adapter.
    pub fn rate_limit_for(&self, adapter: &str) -> RateLimitConfig {
        self.adapter_limits.get(adapter).copied().unwrap_or(self.rate_limit)
    }
}

struct Vars<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr + std::fmt::Display + Copy>(&mut self, key: &str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    self.warnings
                        .push(format!("{key}={raw:?} is not valid, using {default}"));
                    default
                }
            },
        }
    }
}

/// Load per-adapter rate limits: `{"stripe-api": {"limit": 2, "window_secs": 60}}`.
pub fn load_limits(path: &str) -> Result<HashMap<String, RateLimitConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = GatewayConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(cfg, GatewayConfig::default());
        assert!(cfg.warnings.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let cfg = GatewayConfig::from_vars(vars(&[
            ("RELAY_BIND", "127.0.0.1:8080"),
            ("RELAY_RATE_LIMIT", "2"),
            ("RELAY_CB_THRESHOLD", "3"),
            ("RELAY_RETRY_ATTEMPTS", "5"),
            ("RELAY_UPSTREAM_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8080");
        assert_eq!(cfg.rate_limit.limit, 2);
        assert_eq!(cfg.circuit.threshold, 3);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.upstream_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_values_fall_back_with_warning() {
        let cfg = GatewayConfig::from_vars(vars(&[("RELAY_RATE_LIMIT", "lots")])).unwrap();
        assert_eq!(cfg.rate_limit.limit, 60);
        assert_eq!(cfg.warnings.len(), 1);
        assert!(cfg.warnings[0].contains("RELAY_RATE_LIMIT"));
    }

    #[test]
    fn per_adapter_limits_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"stripe-api": {{"limit": 2, "window_secs": 60}}}}"#).unwrap();
        let path = f.path().to_str().unwrap().to_string();
        let cfg = GatewayConfig::from_vars(vars(&[("RELAY_LIMITS", path.as_str())])).unwrap();
        assert_eq!(cfg.rate_limit_for("stripe-api"), RateLimitConfig { limit: 2, window_secs: 60 });
        assert_eq!(cfg.rate_limit_for("paystack-api"), RateLimitConfig::default());
    }

    #[test]
    fn missing_limits_file_is_an_error() {
        let err = GatewayConfig::from_vars(vars(&[("RELAY_LIMITS", "/nonexistent/limits.json")]));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }
}
