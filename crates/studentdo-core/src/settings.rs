use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

pub const SETTINGS_FILE: &str = "preferences.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Full key/value snapshot, as published after every write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            SettingValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            SettingValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            SettingValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Durable key/value store in a single TOML file. Keys are independent:
/// a write touches only its own key and republishes the whole snapshot.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<Settings>,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(SETTINGS_FILE);
        let settings = read_settings(&path);
        info!(
            file = %path.display(),
            keys = settings.values.len(),
            "opened settings store"
        );
        let (tx, _) = watch::channel(settings.clone());
        Ok(Self {
            path,
            current: Mutex::new(settings),
            tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Settings {
        self.current.lock().clone()
    }

    #[tracing::instrument(skip(self, value))]
    pub fn set(&self, key: &str, value: impl Into<SettingValue>) -> Result<()> {
        let mut guard = self.current.lock();
        let mut next = guard.clone();
        next.values.insert(key.to_string(), value.into());
        if next == *guard {
            debug!(key, "setting unchanged");
            return Ok(());
        }

        write_settings(&self.path, &next)?;
        *guard = next;
        self.tx.send_replace(guard.clone());
        debug!(key, "setting written");
        Ok(())
    }
}

/// A missing, unreadable or corrupt file reads as an empty store. A corrupt
/// file stays on disk until the next write replaces it.
fn read_settings(path: &Path) -> Settings {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(file = %path.display(), "no settings file; using defaults");
            return Settings::default();
        }
        Err(err) => {
            warn!(file = %path.display(), error = %err, "failed reading settings; using defaults");
            return Settings::default();
        }
    };

    toml::from_str(&text).unwrap_or_else(|err: toml::de::Error| {
        warn!(file = %path.display(), error = %err, "corrupt settings file; using defaults");
        Settings::default()
    })
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    let rendered = toml::to_string(settings)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
    temp.write_all(rendered.as_bytes())
        .map_err(|err| StoreError::io(path, err))?;
    temp.flush().map_err(|err| StoreError::io(path, err))?;
    temp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let temp = tempdir().expect("tempdir");
        let store = SettingsStore::open(temp.path()).expect("open");
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn writes_persist_and_keys_stay_independent() {
        let temp = tempdir().expect("tempdir");
        let store = SettingsStore::open(temp.path()).expect("open");
        store.set("dark_theme", true).expect("set theme");
        store.set("sort_order", "name").expect("set sort");
        store.set("priority_filter", 2_i64).expect("set filter");
        drop(store);

        let reopened = SettingsStore::open(temp.path()).expect("reopen");
        let snapshot = reopened.snapshot();
        assert_eq!(snapshot.get_bool("dark_theme"), Some(true));
        assert_eq!(snapshot.get_str("sort_order"), Some("name"));
        assert_eq!(snapshot.get_int("priority_filter"), Some(2));
    }

    #[test]
    fn publishes_full_snapshot_on_write() {
        let temp = tempdir().expect("tempdir");
        let store = SettingsStore::open(temp.path()).expect("open");
        store.set("dark_theme", true).expect("set theme");

        let mut rx = store.subscribe();
        store.set("sort_order", "priority").expect("set sort");
        assert!(rx.has_changed().expect("sender alive"));
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.get_bool("dark_theme"), Some(true));
        assert_eq!(snapshot.get_str("sort_order"), Some("priority"));
    }

    #[test]
    fn corrupt_file_reads_as_defaults_until_rewritten() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join(SETTINGS_FILE), "dark_theme = [").expect("write");
        let store = SettingsStore::open(temp.path()).expect("open corrupt");
        assert!(store.snapshot().is_empty());

        store.set("dark_theme", true).expect("set theme");
        drop(store);
        let reopened = SettingsStore::open(temp.path()).expect("reopen");
        assert_eq!(reopened.snapshot().get_bool("dark_theme"), Some(true));
    }

    #[test]
    fn unreadable_path_falls_back_to_defaults() {
        let temp = tempdir().expect("tempdir");
        // A directory where the file should be fails with an I/O error that
        // is not NotFound.
        fs::create_dir(temp.path().join(SETTINGS_FILE)).expect("mkdir");
        let store = SettingsStore::open(temp.path()).expect("open");
        assert!(store.snapshot().is_empty());
    }
}
