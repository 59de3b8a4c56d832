//! Per-device preferences: a small key -> JSON value store.
//!
//! Storage failures never reach callers; they are logged and the in-memory
//! copy stays authoritative for the rest of the session.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;

pub trait Preferences {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
}

impl dyn Preferences + '_ {
    /// Typed read; a missing or mistyped entry yields `default`.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v),
            Err(e) => tracing::warn!(key, error = %e, "preference not serializable"),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Map<String, Value>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }
}

/// JSON object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Map<String, Value>,
}

impl FilePreferences {
    pub fn open(path: PathBuf) -> Self {
        let values = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "preferences file corrupt, starting empty");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self { path, values }
    }

    /// `<data dir>/dashty/prefs.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("dashty").join("prefs.json"))
    }

    fn flush(&self) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(error = %e, "cannot create preferences dir");
                return;
            }
        }
        let text = match serde_json::to_string_pretty(&self.values) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "cannot encode preferences");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, text) {
            tracing::warn!(path = %self.path.display(), error = %e, "cannot write preferences");
        }
    }
}

impl Preferences for FilePreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.flush();
    }
}

/// File-backed store when a data dir exists, memory otherwise.
pub fn open_default() -> Box<dyn Preferences> {
    match FilePreferences::default_path() {
        Some(path) => Box::new(FilePreferences::open(path)),
        None => {
            tracing::warn!("no data directory, preferences will not persist");
            Box::new(MemoryPreferences::new())
        }
    }
}
