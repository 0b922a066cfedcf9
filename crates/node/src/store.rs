//! Key-value persistence for node state.
//!
//! Keys follow `node.<id>.<property>`; values are JSON. Writes are
//! read-modify-write per key, nothing spans keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;

use zw_domain::error::{Error, Result};

pub trait ValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Every key starting with `prefix`, ascending.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Remove every key starting with `prefix`. Returns how many went.
    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_with_prefix(prefix);
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl ValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        prefix_keys(&self.values.read(), prefix)
    }
}

fn prefix_keys(values: &BTreeMap<String, Value>, prefix: &str) -> Vec<String> {
    values
        .range(prefix.to_owned()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Store backed by `nodes.json` in the cache directory. Every write goes to
/// disk before it returns so a crash resumes from the last recorded stage.
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Load or create the store at `cache_dir/nodes.json`.
    pub fn open(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(Error::Io)?;

        let path = cache_dir.join("nodes.json");
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "value cache unreadable, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        tracing::info!(
            values = values.len(),
            path = %path.display(),
            "value cache loaded"
        );

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| Error::Store(format!("serializing value cache: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }
}

impl ValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write();
        if values.get(key) == Some(&value) {
            return Ok(());
        }
        values.insert(key.to_owned(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write();
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        prefix_keys(&self.values.read(), prefix)
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut values = self.values.write();
        let keys = prefix_keys(&values, prefix);
        for key in &keys {
            values.remove(key);
        }
        if !keys.is_empty() {
            self.flush(&values)?;
        }
        Ok(keys.len())
    }
}
