//! Connection registry
//!
//! Maps config entry ids to their instantiated clients. Owned by the hub and
//! handed to the media player platform at setup; written only during entry
//! setup/unload.

use std::collections::HashMap;

use crate::dreambox::SharedClient;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, SharedClient>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, entry_id: &str, client: SharedClient) {
        self.connections.insert(entry_id.to_string(), client);
    }

    pub fn get(&self, entry_id: &str) -> Option<SharedClient> {
        self.connections.get(entry_id).cloned()
    }

    pub fn remove(&mut self, entry_id: &str) -> Option<SharedClient> {
        self.connections.remove(entry_id)
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.connections.contains_key(entry_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
