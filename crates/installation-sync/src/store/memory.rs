//! In-memory state store

use super::{LocalStateStore, StoreValue};
use dashmap::DashMap;

/// Non-persistent store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, StoreValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl LocalStateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoreValue> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: StoreValue) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set_string("push_registration_id", "ID1");
        assert_eq!(store.get_string("push_registration_id").as_deref(), Some("ID1"));
        assert_eq!(store.len(), 1);

        store.remove("push_registration_id");
        assert!(store.get("push_registration_id").is_none());
    }

    #[test]
    fn test_overwrite_replaces_type() {
        let store = MemoryStore::new();
        store.set_bool("flag", true);
        store.set_int("flag", 3);
        assert_eq!(store.get_bool("flag"), None);
        assert_eq!(store.get_int("flag"), Some(3));
    }
}
