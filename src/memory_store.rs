//! In-process fast store backed by Moka
//!
//! Mirrors the subset of Redis semantics the hybrid cache relies on: blob and
//! hash values under one keyspace, per-key expiry and byte-weighted memory
//! accounting. Capacity is unbounded here; bounding is the eviction
//! manager's job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::Op;

use crate::{FastStore, StoreError};

#[derive(Debug, Clone)]
enum Slot {
    Blob(Arc<Vec<u8>>),
    Hash(Arc<HashMap<String, Vec<u8>>>),
}

#[derive(Debug, Clone)]
struct StoredValue {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn weight(&self, key: &str) -> u32 {
        let payload = match &self.slot {
            Slot::Blob(bytes) => bytes.len(),
            Slot::Hash(fields) => fields.iter().map(|(k, v)| k.len() + v.len()).sum(),
        };
        u32::try_from(key.len() + payload).unwrap_or(u32::MAX)
    }
}

/// Expiry driven by the absolute deadline stored with each value
struct DeadlineExpiry;

impl Expiry<String, StoredValue> for DeadlineExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        created_at: Instant,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(updated_at))
    }
}

#[derive(Clone)]
pub struct MemoryFastStore {
    cache: Cache<String, StoredValue>,
}

impl Default for MemoryFastStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFastStore {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .weigher(|key: &String, value: &StoredValue| value.weight(key))
            .expire_after(DeadlineExpiry)
            .build();
        Self { cache }
    }

    /// Whether `key` currently holds a live value
    pub fn contains_key(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::WrongType {
            key: key.to_owned(),
        }
    }

    async fn read_hash(&self, key: &str) -> Result<Option<Arc<HashMap<String, Vec<u8>>>>, StoreError> {
        match self.cache.get(key).await {
            None => Ok(None),
            Some(StoredValue {
                slot: Slot::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.cache.get(key).await {
            None => Ok(None),
            Some(StoredValue {
                slot: Slot::Blob(bytes),
                ..
            }) => Ok(Some(bytes.as_ref().clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let stored = StoredValue {
            slot: Slot::Blob(Arc::new(value)),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.cache.insert(key.to_owned(), stored).await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hash_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let Some(hash) = self.read_hash(key).await? else {
            return Ok(HashMap::new());
        };
        Ok(fields
            .iter()
            .filter_map(|field| hash.get(field).map(|v| (field.clone(), v.clone())))
            .collect())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        Ok(self
            .read_hash(key)
            .await?
            .map(|hash| hash.as_ref().clone())
            .unwrap_or_default())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: HashMap<String, Vec<u8>>,
    ) -> Result<(), StoreError> {
        self.hash_merge(key, fields, Vec::new()).await
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        let existing = match self.read_hash(key).await? {
            Some(hash) => fields.iter().filter(|f| hash.contains_key(*f)).count() as u64,
            None => return Ok(0),
        };
        self.hash_merge(key, HashMap::new(), fields.to_vec()).await?;
        Ok(existing)
    }

    async fn hash_merge(
        &self,
        key: &str,
        upserts: HashMap<String, Vec<u8>>,
        removals: Vec<String>,
    ) -> Result<(), StoreError> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }

        let mut type_clash = false;
        let clash = &mut type_clash;
        // The compute closure runs under Moka's per-key lock, so concurrent
        // merges into one hash never interleave.
        self.cache
            .entry(key.to_owned())
            .and_compute_with(|current| {
                let op = match current.map(|entry| entry.into_value()) {
                    Some(StoredValue {
                        slot: Slot::Blob(_),
                        ..
                    }) => {
                        *clash = true;
                        Op::Nop
                    }
                    existing => {
                        let expires_at = existing.as_ref().and_then(|v| v.expires_at);
                        let mut fields = match existing {
                            Some(StoredValue {
                                slot: Slot::Hash(fields),
                                ..
                            }) => fields.as_ref().clone(),
                            _ => HashMap::new(),
                        };
                        fields.extend(upserts);
                        for field in &removals {
                            fields.remove(field);
                        }
                        if fields.is_empty() {
                            Op::Remove
                        } else {
                            Op::Put(StoredValue {
                                slot: Slot::Hash(Arc::new(fields)),
                                expires_at,
                            })
                        }
                    }
                };
                std::future::ready(op)
            })
            .await;

        if type_clash {
            return Err(Self::wrong_type(key));
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let deadline = Instant::now() + ttl;
        let mut existed = false;
        let found = &mut existed;
        // Same per-key lock as hash_merge, so a concurrent merge is never overwritten
        self.cache
            .entry(key.to_owned())
            .and_compute_with(|current| {
                let op = match current.map(|entry| entry.into_value()) {
                    Some(value) => {
                        *found = true;
                        Op::Put(StoredValue {
                            expires_at: Some(deadline),
                            ..value
                        })
                    }
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        Ok(existed)
    }

    async fn memory_info(&self) -> Result<u64, StoreError> {
        self.cache.run_pending_tasks().await;
        Ok(self.cache.weighted_size())
    }
}
