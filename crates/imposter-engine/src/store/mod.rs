//! Key-value stores used by captures, scripts and the store REST API.
//!
//! Named stores live for the lifetime of the process (or until deleted).
//! Request-scoped stores are created on first use for a request id and are
//! removed by the [`StoreRegistry`] once the response has been sent.

mod registry;

pub use registry::{StoreRegistry, DEFAULT_STORE_NAME, REQUEST_STORE_NAME};

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Backend-agnostic store interface.
///
/// Synchronous; implementations must allow concurrent reads and serialise
/// writes so that a reader never observes a partially applied write.
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, key: &str) -> Option<Value>;

    /// Insert or replace an item. Returns true if the key was not present.
    fn save(&self, key: &str, value: Value) -> bool;

    fn has_item(&self, key: &str) -> bool;

    /// Returns true if an item was removed.
    fn delete(&self, key: &str) -> bool;

    /// All items in insertion order.
    fn load_all(&self) -> Map<String, Value>;

    fn load_by_key_prefix(&self, prefix: &str) -> Map<String, Value> {
        self.load_all()
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect()
    }

    fn count(&self) -> usize;
}

/// In-memory store with insertion-ordered keys.
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    data: RwLock<Map<String, Value>>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(Map::new()),
        }
    }
}

impl Store for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    fn save(&self, key: &str, value: Value) -> bool {
        self.data.write().insert(key.to_string(), value).is_none()
    }

    fn has_item(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    fn delete(&self, key: &str) -> bool {
        self.data.write().shift_remove(key).is_some()
    }

    fn load_all(&self) -> Map<String, Value> {
        self.data.read().clone()
    }

    fn load_by_key_prefix(&self, prefix: &str) -> Map<String, Value> {
        self.data
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn count(&self) -> usize {
        self.data.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_save_and_load() {
        let store = InMemoryStore::new("test");
        assert!(store.save("foo", json!("bar")));
        assert!(!store.save("foo", json!("baz")));
        assert_eq!(store.load("foo"), Some(json!("baz")));
        assert!(store.has_item("foo"));
        assert_eq!(store.load("missing"), None);
    }

    #[test]
    fn test_delete() {
        let store = InMemoryStore::new("test");
        store.save("foo", json!(1));
        assert!(store.delete("foo"));
        assert!(!store.delete("foo"));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_insertion_order_and_prefix() {
        let store = InMemoryStore::new("test");
        store.save("user:2", json!("b"));
        store.save("order:1", json!("x"));
        store.save("user:1", json!("a"));

        let keys: Vec<String> = store.load_all().keys().cloned().collect();
        assert_eq!(keys, vec!["user:2", "order:1", "user:1"]);

        let users = store.load_by_key_prefix("user:");
        assert_eq!(users.len(), 2);
        assert_eq!(users.keys().next().map(String::as_str), Some("user:2"));
    }

    #[test]
    fn test_concurrent_writes() {
        let store = Arc::new(InMemoryStore::new("test"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.save(&format!("{t}-{i}"), json!(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.count(), 800);
    }
}
