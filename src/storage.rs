//! Isolated per-plugin key-value storage
//!
//! Every plugin sees a logically private store layered over the host's
//! single shared key-value store. Keys are transparently rewritten to
//! `plugin_<id>_<key>`; the plugin id is validated at construction so a
//! crafted id can never escape its own prefix.

use crate::{validate_plugin_id, PluginResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The host's flat key-value store. Synchronous by design: the interpreter
/// boundary plugin calls cross is synchronous, and writes are small.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// In-memory store, used in tests and as a safe default.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

/// Flat-file store persisted as a single pretty-printed JSON object.
///
/// A corrupt file is logged and treated as empty rather than crashing the
/// host; write failures are logged and the in-memory view stays current.
#[derive(Debug)]
pub struct JsonFileKvStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileKvStore {
    pub fn open(path: impl Into<PathBuf>) -> PluginResult<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, String>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "settings file is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) {
        let text = match serde_json::to_string_pretty(entries) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize settings store");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, text) {
            tracing::error!(path = %self.path.display(), error = %e, "failed to persist settings store");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        self.flush(&entries);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

/// A plugin's private view of the shared store.
///
/// Reachable only through the `storage` capability; without that grant the
/// context hands the plugin a deny-stub instead.
#[derive(Clone)]
pub struct PluginStorage {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl PluginStorage {
    /// Fails with a validation error for any id outside `[A-Za-z0-9._-]+`;
    /// nothing is written in that case.
    pub fn new(store: Arc<dyn KeyValueStore>, plugin_id: &str) -> PluginResult<Self> {
        validate_plugin_id(plugin_id)?;
        Ok(Self {
            store,
            prefix: format!("plugin_{plugin_id}_"),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.store.get(&self.full_key(key))
    }

    pub fn set_item(&self, key: &str, value: &str) {
        self.store.set(&self.full_key(key), value);
    }

    pub fn remove_item(&self, key: &str) {
        self.store.remove(&self.full_key(key));
    }

    /// Remove every key under this plugin's prefix and nothing else.
    pub fn clear(&self) {
        for key in self.store.keys() {
            if key.starts_with(&self.prefix) {
                self.store.remove(&key);
            }
        }
    }

    /// JSON convenience read. A malformed stored value is logged and
    /// reported as absent; plugin data corruption must not crash the host.
    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self.get_item(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key, error = %e, "plugin storage holds malformed JSON");
                None
            }
        }
    }

    pub fn set_json(&self, key: &str, value: &serde_json::Value) {
        match serde_json::to_string(value) {
            Ok(text) => self.set_item(key, &text),
            Err(e) => tracing::error!(key, error = %e, "failed to serialize plugin JSON value"),
        }
    }
}
