//! Audit trail of dispatches, and the report built over it.
//!
//! Writes are best-effort: a slow or failing ledger is logged and counted,
//! never surfaced to the caller. Reports include:
//! - Summary statistics (total, successes, failures, mean duration)
//! - Counts by adapter, by status code and by error code
//! - Timeline of the most recent records

use chrono::{DateTime, Utc};
use relay_ledger::Ledger;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const TIMELINE_LEN: usize = 50;

/// One dispatch, as recorded. Never holds credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub adapter_name: String,
    pub tool_name: String,
    pub caller_id: String,
    pub request_snapshot: Value,
    pub result_snapshot: Value,
    pub status_code: u16,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    fn error_code(&self) -> Option<&str> {
        self.result_snapshot
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
    }
}

pub struct AuditLog {
    ledger: Arc<dyn Ledger>,
    timeout: Duration,
}

impl AuditLog {
    pub fn new(ledger: Arc<dyn Ledger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// Deadline for one append.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Append one record. Returns whether it was written.
    pub async fn record(&self, record: &AuditRecord) -> bool {
        let entry = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                self.write_failed(record, &e.to_string());
                return false;
            }
        };
        match tokio::time::timeout(self.timeout, self.ledger.append(&entry)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.write_failed(record, &format!("{e:#}"));
                false
            }
            Err(_) => {
                self.write_failed(record, &format!("timed out after {}ms", self.timeout.as_millis()));
                false
            }
        }
    }

    fn write_failed(&self, record: &AuditRecord, cause: &str) {
        metrics::counter!("relay_audit_write_failures_total").increment(1);
        warn!(
            adapter = %record.adapter_name,
            tool = %record.tool_name,
            error = cause,
            "audit write failed"
        );
    }

    /// Every parseable record, in append order.
    pub async fn records(&self) -> anyhow::Result<Vec<AuditRecord>> {
        Ok(self
            .ledger
            .entries()
            .await?
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    pub async fn report(&self) -> anyhow::Result<AuditReport> {
        Ok(generate_report(&self.records().await?))
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.ledger.ping().await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub generated_at: String,
    pub summary: AuditSummary,
    pub by_adapter: BTreeMap<String, usize>,
    pub by_status: BTreeMap<u16, usize>,
    pub by_error: BTreeMap<String, usize>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_records: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub mean_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub adapter: String,
    pub tool: String,
    pub caller: String,
    pub status: u16,
    pub code: Option<String>,
    pub duration_ms: u64,
}

pub fn generate_report(records: &[AuditRecord]) -> AuditReport {
    let mut by_adapter: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_status: BTreeMap<u16, usize> = BTreeMap::new();
    let mut by_error: BTreeMap<String, usize> = BTreeMap::new();
    let mut success_count = 0usize;
    let mut total_duration = 0u64;

    for rec in records {
        *by_adapter.entry(rec.adapter_name.clone()).or_insert(0) += 1;
        *by_status.entry(rec.status_code).or_insert(0) += 1;
        match rec.error_code() {
            Some(code) => *by_error.entry(code.to_string()).or_insert(0) += 1,
            None => success_count += 1,
        }
        total_duration += rec.duration_ms;
    }

    let timeline = records
        .iter()
        .rev()
        .take(TIMELINE_LEN)
        .map(|rec| TimelineEntry {
            timestamp: rec.timestamp,
            adapter: rec.adapter_name.clone(),
            tool: rec.tool_name.clone(),
            caller: rec.caller_id.clone(),
            status: rec.status_code,
            code: rec.error_code().map(str::to_string),
            duration_ms: rec.duration_ms,
        })
        .collect();

    let total = records.len();
    AuditReport {
        generated_at: Utc::now().to_rfc3339(),
        summary: AuditSummary {
            total_records: total,
            success_count,
            failure_count: total - success_count,
            mean_duration_ms: if total == 0 {
                0.0
            } else {
                total_duration as f64 / total as f64
            },
        },
        by_adapter,
        by_status,
        by_error,
        timeline,
    }
}
