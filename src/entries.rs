//! Config entries and their persistence
//!
//! One entry per configured box. Entries are written to `entries.json` in the
//! config subdirectory after every change.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{get_config_file_path, read_config_file};
use crate::dreambox::types::{ConnectionDescriptor, DEFAULT_PICON_PATH};

const ENTRIES_FILE: &str = "entries.json";

/// Connection data captured by the config flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub host: String,
    pub name: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub ssl: bool,
    /// Only present on entries created before options existed, or by the flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picon_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picon_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    pub title: String,
    pub data: EntryData,
    #[serde(default)]
    pub options: EntryOptions,
}

/// Random 32-char hex id for entries and flows
pub fn new_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

impl ConfigEntry {
    pub fn new(title: String, data: EntryData, unique_id: Option<String>) -> Self {
        Self {
            entry_id: new_id(),
            unique_id,
            title,
            data,
            options: EntryOptions::default(),
        }
    }

    /// Options with `picon_path` backfilled from data (or the default) when missing.
    /// Returns `None` when nothing needs to change.
    pub fn options_with_backfill(&self) -> Option<EntryOptions> {
        if self.options.picon_path.is_some() {
            return None;
        }
        let mut options = self.options.clone();
        options.picon_path = Some(
            self.data
                .picon_path
                .clone()
                .unwrap_or_else(|| DEFAULT_PICON_PATH.to_string()),
        );
        Some(options)
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: self.data.host.clone(),
            port: self.data.port,
            username: self.data.username.clone(),
            password: self.data.password.clone(),
            use_tls: self.data.ssl,
            picon_path: self
                .options
                .picon_path
                .clone()
                .unwrap_or_else(|| DEFAULT_PICON_PATH.to_string()),
        }
    }
}

/// Ordered collection of entries, optionally backed by a file
#[derive(Debug, Default)]
pub struct EntryStore {
    path: Option<PathBuf>,
    entries: Vec<ConfigEntry>,
}

impl EntryStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store backed by `path`, loading it if it exists
    pub fn open(path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .map(|content| Self::parse(&content))
            .unwrap_or_default();
        Self {
            path: Some(path),
            entries,
        }
    }

    /// Store backed by `entries.json` in the config directory
    pub fn load_default() -> Self {
        let entries = read_config_file(ENTRIES_FILE)
            .map(|content| Self::parse(&content))
            .unwrap_or_default();
        if !entries.is_empty() {
            tracing::info!("Loaded {} config entries from disk", entries.len());
        }
        Self {
            path: Some(get_config_file_path(ENTRIES_FILE)),
            entries,
        }
    }

    fn parse(content: &str) -> Vec<ConfigEntry> {
        match serde_json::from_str(content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to parse config entries: {}", e);
                Vec::new()
            }
        }
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Failed to create {}: {}", parent.display(), e);
            }
        }
        match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::error!("Failed to save config entries: {}", e);
                } else {
                    tracing::debug!("Saved {} config entries to disk", self.entries.len());
                }
            }
            Err(e) => tracing::error!("Failed to serialize config entries: {}", e),
        }
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, entry_id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn find_by_host(&self, host: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.data.host == host)
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<&ConfigEntry> {
        self.entries
            .iter()
            .find(|e| e.unique_id.as_deref() == Some(unique_id))
    }

    pub fn add(&mut self, entry: ConfigEntry) {
        self.entries.push(entry);
        self.save();
    }

    pub fn remove(&mut self, entry_id: &str) -> Option<ConfigEntry> {
        let index = self.entries.iter().position(|e| e.entry_id == entry_id)?;
        let entry = self.entries.remove(index);
        self.save();
        Some(entry)
    }

    pub fn update_unique_id(&mut self, entry_id: &str, unique_id: &str) -> bool {
        self.update(entry_id, |entry| {
            if entry.unique_id.as_deref() == Some(unique_id) {
                return false;
            }
            entry.unique_id = Some(unique_id.to_string());
            true
        })
    }

    pub fn update_host(&mut self, entry_id: &str, host: &str) -> bool {
        self.update(entry_id, |entry| {
            if entry.data.host == host {
                return false;
            }
            entry.data.host = host.to_string();
            true
        })
    }

    pub fn update_options(&mut self, entry_id: &str, options: EntryOptions) -> bool {
        self.update(entry_id, |entry| {
            if entry.options == options {
                return false;
            }
            entry.options = options;
            true
        })
    }

    /// Apply `change` to one entry; persists when it reports a change
    fn update(&mut self, entry_id: &str, change: impl FnOnce(&mut ConfigEntry) -> bool) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.entry_id == entry_id) else {
            return false;
        };
        let changed = change(entry);
        if changed {
            self.save();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(host: &str) -> EntryData {
        EntryData {
            host: host.to_string(),
            name: "Living room".to_string(),
            port: 80,
            username: "root".to_string(),
            password: "dreambox".to_string(),
            ssl: false,
            picon_path: None,
        }
    }

    #[test]
    fn test_options_backfill_from_data() {
        let mut entry = ConfigEntry::new("Box".to_string(), data("10.0.0.2"), None);
        entry.data.picon_path = Some("/media/hdd/picon/".to_string());

        let options = entry.options_with_backfill().expect("needs backfill");
        assert_eq!(options.picon_path.as_deref(), Some("/media/hdd/picon/"));

        entry.options = options;
        assert!(entry.options_with_backfill().is_none());
        assert_eq!(entry.descriptor().picon_path, "/media/hdd/picon/");
    }

    #[test]
    fn test_options_backfill_defaults() {
        let entry = ConfigEntry::new("Box".to_string(), data("10.0.0.2"), None);
        let options = entry.options_with_backfill().expect("needs backfill");
        assert_eq!(options.picon_path.as_deref(), Some(DEFAULT_PICON_PATH));
    }

    #[test]
    fn test_descriptor_from_entry() {
        let mut d = data("10.0.0.2");
        d.ssl = true;
        d.port = 443;
        let entry = ConfigEntry::new("Box".to_string(), d, None);
        let descriptor = entry.descriptor();
        assert_eq!(descriptor.base_url(), "https://10.0.0.2:443");
        assert_eq!(descriptor.picon_path, DEFAULT_PICON_PATH);
    }

    #[test]
    fn test_store_persists_and_reloads() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("nested").join("entries.json");

        let entry = ConfigEntry::new("Box".to_string(), data("10.0.0.2"), None);
        let entry_id = entry.entry_id.clone();
        {
            let mut store = EntryStore::open(path.clone());
            store.add(entry);
            assert!(store.update_unique_id(&entry_id, "00:09:34:aa:bb:cc"));
            assert!(!store.update_unique_id(&entry_id, "00:09:34:aa:bb:cc"));
            assert!(store.update_host(&entry_id, "10.0.0.3"));
        }

        let store = EntryStore::open(path);
        let entry = store.get(&entry_id).expect("entry persisted");
        assert_eq!(entry.unique_id.as_deref(), Some("00:09:34:aa:bb:cc"));
        assert_eq!(entry.data.host, "10.0.0.3");
        assert!(store.find_by_host("10.0.0.3").is_some());
        assert!(store.find_by_unique_id("00:09:34:aa:bb:cc").is_some());
    }

    #[test]
    fn test_store_remove() {
        let mut store = EntryStore::in_memory();
        let entry = ConfigEntry::new("Box".to_string(), data("10.0.0.2"), None);
        let entry_id = entry.entry_id.clone();
        store.add(entry);
        assert!(store.remove(&entry_id).is_some());
        assert!(store.remove(&entry_id).is_none());
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("entries.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(EntryStore::open(path).entries().is_empty());
    }

    #[test]
    fn test_unwritable_directory_keeps_entries_in_memory() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        // A plain file where the directory should be
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").expect("write");
        let path = blocker.join("entries.json");

        let mut store = EntryStore::open(path.clone());
        store.add(ConfigEntry::new("Box".to_string(), data("10.0.0.2"), None));

        assert_eq!(store.entries().len(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_ids_are_unique_hex() {
        let a = new_id();
        let b = new_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
