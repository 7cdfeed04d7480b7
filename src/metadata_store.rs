//! Storage of the metadata of installed runtimes, indexed by runtime key.
use crate::runtime::{RuntimeKey, RuntimeMetadata};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataStoreError {
    #[error("metadata store unavailable: `{0}`")]
    Unavailable(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait MetadataStore: Send + Sync {
    fn put(&self, key: &RuntimeKey, metadata: &RuntimeMetadata) -> Result<(), MetadataStoreError>;
    /// Removing a key that does not exist is not an error.
    fn delete(&self, key: &RuntimeKey) -> Result<(), MetadataStoreError>;
    fn list(&self, prefix: &str) -> Result<Vec<RuntimeKey>, MetadataStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: DashMap<RuntimeKey, RuntimeMetadata>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RuntimeKey) -> Option<RuntimeMetadata> {
        self.records.get(key).map(|entry| entry.value().clone())
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn put(&self, key: &RuntimeKey, metadata: &RuntimeMetadata) -> Result<(), MetadataStoreError> {
        self.records.insert(key.clone(), metadata.clone());
        Ok(())
    }

    fn delete(&self, key: &RuntimeKey) -> Result<(), MetadataStoreError> {
        self.records.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<RuntimeKey>, MetadataStoreError> {
        let mut keys: Vec<RuntimeKey> = self
            .records
            .iter()
            .filter(|entry| entry.key().as_str().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
