//! Named stores (`ia`, `nube`, ...) bound explicitly per component

use crate::store::{AuthRecordStore, FileStore, InMemoryStore, MemoryStore};
use mostrador_core::config::{StoreBackend, StoreConfig};
use mostrador_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
struct NamedStore {
    memory: Arc<dyn MemoryStore>,
    auth: Arc<dyn AuthRecordStore>,
}

#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: BTreeMap<String, NamedStore>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every configured store. `file` stores default to `data/<name>`.
    pub async fn from_config(stores: &BTreeMap<String, StoreConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in stores {
            match config.backend {
                StoreBackend::Memory => registry.insert(name, Arc::new(InMemoryStore::new())),
                StoreBackend::File => {
                    let root = config.path.clone().unwrap_or_else(|| PathBuf::from("data").join(name));
                    registry.insert(name, Arc::new(FileStore::open(root).await?));
                }
            }
            info!(store = %name, backend = ?config.backend, "store ready");
        }
        Ok(registry)
    }

    pub fn insert<S>(&mut self, name: impl Into<String>, store: Arc<S>)
    where
        S: MemoryStore + AuthRecordStore + 'static,
    {
        let named = NamedStore {
            memory: store.clone(),
            auth: store,
        };
        self.stores.insert(name.into(), named);
    }

    pub fn with<S>(mut self, name: impl Into<String>, store: Arc<S>) -> Self
    where
        S: MemoryStore + AuthRecordStore + 'static,
    {
        self.insert(name, store);
        self
    }

    pub fn memory(&self, name: &str) -> Result<Arc<dyn MemoryStore>> {
        self.named(name).map(|s| s.memory.clone())
    }

    pub fn auth(&self, name: &str) -> Result<Arc<dyn AuthRecordStore>> {
        self.named(name).map(|s| s.auth.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn named(&self, name: &str) -> Result<&NamedStore> {
        self.stores
            .get(name)
            .ok_or_else(|| Error::ConfigError(format!("unknown store '{}'", name)))
    }
}
