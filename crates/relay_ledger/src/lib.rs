//! Append-only ledger of JSON entries.
//!
//! The gateway's audit log writes through this interface. Entries are
//! never rewritten or removed here; retention is the operator's concern.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append one entry. Appends are atomic with respect to each other.
    async fn append(&self, entry: &Value) -> Result<()>;

    /// All entries in append order.
    async fn entries(&self) -> Result<Vec<Value>>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> Result<()>;
}

// ── File backend (JSON lines) ───────────────────────────────────────

pub struct FileLedger {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create the parent directory so the first append cannot fail on it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let ledger = Self::new(path);
        if let Some(parent) = ledger.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn append(&self, entry: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open ledger {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<Value>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("read ledger {}", self.path.display())),
        };
        // A crash mid-append can leave a torn last line; skip it.
        let entries = raw
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .filter_map(|(i, l)| match serde_json::from_str(l) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(path = %self.path.display(), line = i + 1, error = %e, "skipping malformed ledger line");
                    None
                }
            })
            .collect();
        Ok(entries)
    }

    async fn ping(&self) -> Result<()> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from("."),
        };
        let meta = fs::metadata(&dir)
            .await
            .with_context(|| format!("ledger dir {} unreachable", dir.display()))?;
        anyhow::ensure!(meta.is_dir(), "{} is not a directory", dir.display());
        Ok(())
    }
}

// ── In-memory backend ───────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<Value>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, entry: &Value) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<Value>> {
        Ok(self.entries.lock().clone())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
