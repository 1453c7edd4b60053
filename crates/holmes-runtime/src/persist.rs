//! Durable key/value side channel for small JSON values.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode persisted values: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), PersistError>;
    fn remove(&mut self, key: &str) -> Result<(), PersistError>;
}

/// In-memory store for tests and runs without a state directory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), PersistError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistError> {
        self.values.remove(key);
        Ok(())
    }
}

/// All values in one JSON object file, rewritten atomically on every change.
///
/// A missing file means no prior values. A corrupt file is logged and
/// treated the same way; it is replaced on the next write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = load(&path);
        Self { path, values }
    }

    fn save(&self) -> Result<(), PersistError> {
        let io_err = |source| PersistError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let serialized = serde_json::to_string_pretty(&self.values)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serialized).map_err(io_err)?;
        fs::rename(&staging, &self.path).map_err(io_err)?;
        debug!(
            target: "holmes::persist",
            path = %self.path.display(), keys = self.values.len(), "state saved"
        );
        Ok(())
    }
}

fn load(path: &Path) -> BTreeMap<String, Value> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return BTreeMap::new(),
        Err(err) => {
            warn!(
                target: "holmes::persist",
                path = %path.display(), error = %err, "cannot read saved state; starting empty"
            );
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(values) => values,
        Err(err) => {
            warn!(
                target: "holmes::persist",
                path = %path.display(), error = %err, "saved state is corrupt; starting empty"
            );
            BTreeMap::new()
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), PersistError> {
        if self.values.get(key) == Some(&value) {
            return Ok(());
        }
        let previous = self.values.insert(key.to_string(), value);
        self.save().inspect_err(|_| match previous {
            Some(previous) => {
                self.values.insert(key.to_string(), previous);
            }
            None => {
                self.values.remove(key);
            }
        })
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistError> {
        let Some(previous) = self.values.remove(key) else {
            return Ok(());
        };
        self.save().inspect_err(|_| {
            self.values.insert(key.to_string(), previous);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("holmes-persist-{}", uuid::Uuid::new_v4()))
            .join("state.json")
    }

    #[test]
    fn values_survive_reopen() {
        let path = scratch_path();
        let mut store = FileStore::open(&path);
        assert_eq!(store.get("holmes--page"), None);
        store.set("holmes--page", json!("projection")).unwrap();
        store
            .set("holmes--projection--model", json!("CNRM-CM5"))
            .unwrap();
        store.remove("holmes--projection--model").unwrap();

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get("holmes--page"), Some(json!("projection")));
        assert_eq!(reopened.get("holmes--projection--model"), None);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_replaced() {
        let path = scratch_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let mut store = FileStore::open(&path);
        assert_eq!(store.get("holmes--page"), None);
        store.set("holmes--page", json!("calibration")).unwrap();
        assert_eq!(
            FileStore::open(&path).get("holmes--page"),
            Some(json!("calibration"))
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn failed_write_leaves_memory_matching_disk() {
        let path = scratch_path();
        let mut store = FileStore::open(&path);
        store.set("holmes--page", json!("calibration")).unwrap();

        // a directory squatting on the staging file makes every write fail
        let staging = path.with_extension("json.tmp");
        fs::create_dir_all(&staging).unwrap();
        assert!(store.set("holmes--page", json!("projection")).is_err());
        assert!(store.set("holmes--calibration", json!({"catchment": "Au Saumon"})).is_err());
        assert!(store.remove("holmes--page").is_err());
        assert_eq!(store.get("holmes--page"), Some(json!("calibration")));
        assert_eq!(store.get("holmes--calibration"), None);

        fs::remove_dir_all(&staging).unwrap();
        store.set("holmes--page", json!("projection")).unwrap();
        assert_eq!(
            FileStore::open(&path).get("holmes--page"),
            Some(json!("projection"))
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn memory_store_round_trips() {
        let mut store = MemoryStore::new().with("a", json!(1));
        assert_eq!(store.get("a"), Some(json!(1)));
        store.remove("a").unwrap();
        assert_eq!(store.get("a"), None);
    }
}
