//! Durable store seam
//!
//! The durable store is the authoritative copy of every record. Implementors
//! typically hold a shared connection pool and take a request-scoped handle
//! per call; the cache never manages pool sizing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Record, StoreError};

/// Persistent backing store
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    async fn find_by_key(&self, key: &str) -> Result<Option<Record>, StoreError>;

    async fn upsert(&self, key: &str, record: Record) -> Result<(), StoreError>;

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError>;

    async fn delete_all(&self) -> Result<(), StoreError>;
}

/// In-process durable store, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    rows: RwLock<HashMap<String, Record>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn upsert(&self, key: &str, record: Record) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if record.is_empty() {
            rows.remove(key);
        } else {
            rows.insert(key.to_owned(), record);
        }
        Ok(())
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError> {
        self.rows.write().await.remove(key);
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.rows.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_durable_store_crud() {
        let store = MemoryDurableStore::new();
        assert!(store.find_by_key("a").await.unwrap().is_none());

        store
            .upsert("a", Record::with_primary(b"one".to_vec()))
            .await
            .unwrap();
        store
            .upsert("b", Record::with_primary(b"two".to_vec()))
            .await
            .unwrap();
        assert_eq!(
            store.find_by_key("a").await.unwrap(),
            Some(Record::with_primary(b"one".to_vec()))
        );

        store.delete_by_key("a").await.unwrap();
        assert!(store.find_by_key("a").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);

        store.delete_all().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_record_is_not_persisted() {
        let store = MemoryDurableStore::new();
        store
            .upsert("a", Record::with_primary(b"one".to_vec()))
            .await
            .unwrap();
        store.upsert("a", Record::default()).await.unwrap();
        assert!(store.find_by_key("a").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
