//! Adapter registry: an immutable snapshot behind one swappable pointer.
//!
//! Readers clone the current `Arc<Snapshot>` under a short read lock and
//! then work lock-free on data that never changes. Writers build a new
//! snapshot and publish it with a single pointer store, so a reader sees
//! either the old or the new set, never a mix.

use crate::error::RegistryError;
use parking_lot::RwLock;
use relay_adapter::AdapterDescriptor;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type Snapshot = BTreeMap<String, Arc<AdapterDescriptor>>;

#[derive(Default)]
pub struct AdapterRegistry {
    current: RwLock<Arc<Snapshot>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish one descriptor, replacing any with the same name.
    pub fn register(&self, descriptor: AdapterDescriptor) -> Result<(), RegistryError> {
        descriptor.validate()?;
        let fingerprint = descriptor.fingerprint();

        let mut current = self.current.write();
        if let Some(existing) = current.get(&descriptor.name) {
            if existing.fingerprint() == fingerprint {
                debug!(adapter = %descriptor.name, %fingerprint, "identical descriptor, skipping swap");
                return Ok(());
            }
        }
        let mut next: Snapshot = (**current).clone();
        info!(adapter = %descriptor.name, version = %descriptor.version, %fingerprint, "adapter registered");
        next.insert(descriptor.name.clone(), Arc::new(descriptor));
        *current = Arc::new(next);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<AdapterDescriptor>> {
        self.snapshot().get(name).cloned()
    }

    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<Arc<AdapterDescriptor>> {
        self.snapshot().values().cloned().collect()
    }

    /// Replace the whole set. Nothing is published unless every descriptor
    /// is valid and names are unique.
    pub fn reload_all(&self, descriptors: Vec<AdapterDescriptor>) -> Result<(), RegistryError> {
        let mut next = Snapshot::new();
        for d in descriptors {
            d.validate()?;
            if next.contains_key(&d.name) {
                return Err(relay_adapter::AdapterError::invalid(&d.name, "adapter registered twice in one reload").into());
            }
            next.insert(d.name.clone(), Arc::new(d));
        }
        let count = next.len();
        *self.current.write() = Arc::new(next);
        info!(adapters = count, "registry reloaded");
        Ok(())
    }

    /// Load every `*.json` artifact in `dir` (sorted by file name) and
    /// publish them with [`reload_all`](Self::reload_all). A file holds one
    /// descriptor or an array of them.
    pub fn load_dir(&self, dir: &Path) -> Result<usize, RegistryError> {
        let descriptors = read_dir(dir)?;
        let count = descriptors.len();
        self.reload_all(descriptors)?;
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }
}

fn read_dir(dir: &Path) -> Result<Vec<AdapterDescriptor>, RegistryError> {
    let load_err = |path: &Path, reason: String| RegistryError::Load {
        path: path.display().to_string(),
        reason,
    };

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| load_err(dir, e.to_string()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("json"))
        .collect();
    files.sort();

    let mut out = Vec::new();
    for path in files {
        let raw = std::fs::read_to_string(&path).map_err(|e| load_err(&path, e.to_string()))?;
        let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| load_err(&path, e.to_string()))?;
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    out.push(serde_json::from_value(item).map_err(|e| load_err(&path, e.to_string()))?);
                }
            }
            other => out.push(serde_json::from_value(other).map_err(|e| load_err(&path, e.to_string()))?),
        }
    }
    Ok(out)
}
