//! Registry of named and request-scoped stores.

use super::{InMemoryStore, Store};
use crate::config::SystemConfig;
use crate::error::ConfigError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Store used when a capture does not name one.
pub const DEFAULT_STORE_NAME: &str = "default";

/// Reserved name that resolves to the current request's ephemeral store.
pub const REQUEST_STORE_NAME: &str = "request";

/// Owns every store in the engine.
///
/// Named stores are created lazily on first write or preload. Request-scoped
/// stores are keyed by request id and must be removed with
/// [`StoreRegistry::remove_request_store`] once the response is complete.
#[derive(Default)]
pub struct StoreRegistry {
    named: RwLock<HashMap<String, Arc<InMemoryStore>>>,
    request_scoped: RwLock<HashMap<String, Arc<InMemoryStore>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a named store, creating it if necessary.
    pub fn open(&self, name: &str) -> Arc<dyn Store> {
        if let Some(store) = self.named.read().get(name) {
            return store.clone();
        }
        let mut named = self.named.write();
        named
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating store '{}'", name);
                Arc::new(InMemoryStore::new(name))
            })
            .clone()
    }

    /// Look up a named store without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.named
            .read()
            .get(name)
            .map(|s| s.clone() as Arc<dyn Store>)
    }

    /// Remove a named store and all of its items.
    pub fn delete_store(&self, name: &str) -> bool {
        self.named.write().remove(name).is_some()
    }

    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.named.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The ephemeral store for a request, created on first use.
    pub fn request_store(&self, request_id: &str) -> Arc<dyn Store> {
        let mut scoped = self.request_scoped.write();
        scoped
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(InMemoryStore::new(REQUEST_STORE_NAME)))
            .clone()
    }

    /// The ephemeral store for a request if one has been created.
    pub fn existing_request_store(&self, request_id: &str) -> Option<Arc<dyn Store>> {
        self.request_scoped
            .read()
            .get(request_id)
            .map(|s| s.clone() as Arc<dyn Store>)
    }

    pub fn remove_request_store(&self, request_id: &str) -> bool {
        let removed = self.request_scoped.write().remove(request_id).is_some();
        if removed {
            debug!("Removed request store for {}", request_id);
        }
        removed
    }

    pub fn request_store_count(&self) -> usize {
        self.request_scoped.read().len()
    }

    /// Resolve a store name in the context of a request. The reserved name
    /// `request` maps to the request's ephemeral store.
    pub fn resolve(&self, name: &str, request_id: Option<&str>) -> Arc<dyn Store> {
        match request_id {
            Some(id) if name == REQUEST_STORE_NAME => self.request_store(id),
            _ => self.open(name),
        }
    }

    /// Load preconfigured items into named stores.
    pub fn preload(&self, system: &SystemConfig) -> Result<(), ConfigError> {
        for (name, preload) in &system.stores {
            let store = self.open(name);
            let mut loaded = 0;

            if let Some(file) = &preload.preload_file {
                let contents =
                    std::fs::read_to_string(file).map_err(|e| ConfigError::Preload {
                        store: name.clone(),
                        message: format!("{}: {e}", file.display()),
                    })?;
                let value: Value =
                    serde_json::from_str(&contents).map_err(|e| ConfigError::Preload {
                        store: name.clone(),
                        message: format!("{}: {e}", file.display()),
                    })?;
                let Value::Object(items) = value else {
                    return Err(ConfigError::Preload {
                        store: name.clone(),
                        message: format!("{} must contain a JSON object", file.display()),
                    });
                };
                for (key, value) in items {
                    store.save(&key, value);
                    loaded += 1;
                }
            }

            if let Some(data) = &preload.preload_data {
                for (key, value) in data {
                    store.save(key, value.clone());
                    loaded += 1;
                }
            }

            info!("Preloaded {} item(s) into store '{}'", loaded, name);
        }
        Ok(())
    }
}
