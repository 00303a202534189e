//! Fast store seam
//!
//! The fast store is a remote key-value cache (Redis in production). Each
//! call is one network round trip; implementations must be cheap to share
//! across tasks.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::StoreError;

/// Key-value cache used as the hot path
#[async_trait]
pub trait FastStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), StoreError>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Read selected fields of a hash. Missing fields are left out of the result.
    async fn hash_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError>;

    async fn hash_set(&self, key: &str, fields: HashMap<String, Vec<u8>>)
    -> Result<(), StoreError>;

    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError>;

    /// Upsert and remove fields of one hash.
    ///
    /// The default is NOT atomic: it issues `hash_set` then `hash_delete`, so a
    /// failure on the second command leaves the upserts applied and the
    /// removals not, and concurrent readers can observe the intermediate state.
    /// Adapters that can apply both halves as one unit (`RedisFastStore` via
    /// `MULTI`, `MemoryFastStore` under a per-key lock) override it.
    async fn hash_merge(
        &self,
        key: &str,
        upserts: HashMap<String, Vec<u8>>,
        removals: Vec<String>,
    ) -> Result<(), StoreError> {
        if !upserts.is_empty() {
            self.hash_set(key, upserts).await?;
        }
        if !removals.is_empty() {
            self.hash_delete(key, &removals).await?;
        }
        Ok(())
    }

    /// Returns false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Absolute bytes currently used by the store
    async fn memory_info(&self) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::MemoryFastStore;

    /// Delegates everything except `hash_merge`, so the default runs
    #[derive(Default)]
    struct TwoStepStore {
        inner: MemoryFastStore,
        fail_hash_delete: AtomicBool,
    }

    #[async_trait]
    impl FastStore for TwoStepStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
            self.inner.delete(keys).await
        }

        async fn hash_get(
            &self,
            key: &str,
            fields: &[String],
        ) -> Result<HashMap<String, Vec<u8>>, StoreError> {
            self.inner.hash_get(key, fields).await
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
            self.inner.hash_get_all(key).await
        }

        async fn hash_set(
            &self,
            key: &str,
            fields: HashMap<String, Vec<u8>>,
        ) -> Result<(), StoreError> {
            self.inner.hash_set(key, fields).await
        }

        async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
            if self.fail_hash_delete.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("hash_delete failed".into()));
            }
            self.inner.hash_delete(key, fields).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.expire(key, ttl).await
        }

        async fn memory_info(&self) -> Result<u64, StoreError> {
            self.inner.memory_info().await
        }
    }

    fn upserts(pairs: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.as_bytes().to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn test_default_hash_merge_applies_upserts_and_removals() {
        let store = TwoStepStore::default();
        store
            .hash_set("h", upserts(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();

        store
            .hash_merge("h", upserts(&[("c", "3")]), vec!["a".to_owned()])
            .await
            .unwrap();

        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all, upserts(&[("b", "2"), ("c", "3")]));
    }

    #[tokio::test]
    async fn test_default_hash_merge_can_half_apply() {
        let store = TwoStepStore::default();
        store.hash_set("h", upserts(&[("a", "1")])).await.unwrap();
        store.fail_hash_delete.store(true, Ordering::SeqCst);

        let result = store
            .hash_merge("h", upserts(&[("b", "2")]), vec!["a".to_owned()])
            .await;
        assert!(result.is_err());

        // upsert landed, removal did not
        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all, upserts(&[("a", "1"), ("b", "2")]));
    }
}
