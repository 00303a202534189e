//! Mock stores with failure injection and controllable memory readings

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{DurableStore, FastStore, MemoryDurableStore, MemoryFastStore, Record, StoreError};

fn injected(op: &str) -> StoreError {
    StoreError::Backend(format!("injected {op} failure").into())
}

/// Fast store whose memory reading is `baseline + weight of every live key`
/// that has been given a weight
#[derive(Default)]
pub(crate) struct MockFastStore {
    inner: MemoryFastStore,
    weights: Mutex<HashMap<String, u64>>,
    baseline: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_memory: AtomicBool,
}

impl MockFastStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_weight(&self, key: &str, weight: u64) {
        self.weights.lock().insert(key.to_owned(), weight);
    }

    pub(crate) fn set_baseline(&self, bytes: u64) {
        self.baseline.store(bytes, Ordering::SeqCst);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_memory(&self, fail: bool) {
        self.fail_memory.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("write"));
        }
        Ok(())
    }
}

#[async_trait]
impl FastStore for MockFastStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check_write()?;
        self.inner.delete(keys).await
    }

    async fn hash_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        self.check_read()?;
        self.inner.hash_get(key, fields).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        self.check_read()?;
        self.inner.hash_get_all(key).await
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: HashMap<String, Vec<u8>>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.hash_set(key, fields).await
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        self.check_write()?;
        self.inner.hash_delete(key, fields).await
    }

    async fn hash_merge(
        &self,
        key: &str,
        upserts: HashMap<String, Vec<u8>>,
        removals: Vec<String>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.hash_merge(key, upserts, removals).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_write()?;
        self.inner.expire(key, ttl).await
    }

    async fn memory_info(&self) -> Result<u64, StoreError> {
        if self.fail_memory.load(Ordering::SeqCst) {
            return Err(injected("memory"));
        }
        let weights = self.weights.lock();
        let live: u64 = weights
            .iter()
            .filter(|(key, _)| self.inner.contains_key(key))
            .map(|(_, weight)| *weight)
            .sum();
        Ok(self.baseline.load(Ordering::SeqCst) + live)
    }
}

/// Durable store that can be told to fail every call
#[derive(Debug, Default)]
pub(crate) struct FlakyDurableStore {
    inner: MemoryDurableStore,
    failing: AtomicBool,
}

impl FlakyDurableStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("durable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FlakyDurableStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.check()?;
        self.inner.find_by_key(key).await
    }

    async fn upsert(&self, key: &str, record: Record) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert(key, record).await
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_by_key(key).await
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_all().await
    }
}
