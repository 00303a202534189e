//! Cache-aside orchestration between the fast store and the durable store
//!
//! Reads hit the fast store first and fall back to the durable store on a
//! miss, warming the fast store before returning. Writes go to the fast
//! store unconditionally and then through to the durable store on a best
//! effort basis. The two stores converge eventually; there is no
//! cross-store transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    AccessTracker, CacheConfig, CacheError, CacheResult, DurableStore, EvictionConfig,
    EvictionManager, FastStore, FieldId, Record, StoreError, StoreSide,
};

/// Options for [`HybridCache::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Fast store expiry; falls back to the configured default
    pub ttl: Option<Duration>,
    /// Write through to the durable store
    pub persist: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            persist: true,
        }
    }
}

impl SetOptions {
    pub fn cache_only() -> Self {
        Self {
            ttl: None,
            persist: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Bounded hybrid cache
pub struct HybridCache<F, D>
where
    F: FastStore,
    D: DurableStore,
{
    inner: Arc<HybridCacheInner<F, D>>,
}

struct HybridCacheInner<F, D> {
    fast: Arc<F>,
    durable: Arc<D>,
    tracker: Arc<AccessTracker>,
    config: CacheConfig,
}

impl<F, D> Clone for HybridCache<F, D>
where
    F: FastStore,
    D: DurableStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, D> HybridCache<F, D>
where
    F: FastStore,
    D: DurableStore,
{
    /// Create a new hybrid cache over shared store handles
    pub fn new(fast: Arc<F>, durable: Arc<D>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(HybridCacheInner {
                fast,
                durable,
                tracker: Arc::new(AccessTracker::new()),
                config,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &Arc<AccessTracker> {
        &self.inner.tracker
    }

    /// Build the eviction manager that shares this cache's access ledger
    pub fn eviction_manager(&self, config: EvictionConfig) -> CacheResult<EvictionManager<F>> {
        EvictionManager::new(
            Arc::clone(&self.inner.fast),
            Arc::clone(&self.inner.tracker),
            self.inner.config.clone(),
            config,
        )
    }

    /// Get a record, falling back to the durable store on a fast store miss.
    ///
    /// Only a cached primary blob counts as a hit. Eviction drops both fast
    /// store keys, but a later `get_fields` warm-up or `set_fields` merge can
    /// recreate the field map alone, so a fields-only copy is merged over the
    /// durable record (cached fields win) before it is returned and re-warmed.
    /// A fast store failure is returned as-is and does not fall back.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Record>> {
        let config = &self.inner.config;
        let fast = &self.inner.fast;

        let primary = fast
            .get(&config.record_key(key))
            .await
            .map_err(CacheError::FastStore)?;
        let fields = fast
            .hash_get_all(&config.fields_key(key))
            .await
            .map_err(CacheError::FastStore)?;
        let cached = Record { primary, fields };

        if cached.primary.is_some() {
            debug!("Cache hit for key: {}", key);
            self.inner
                .tracker
                .record_access(key, cached.estimated_size());
            return Ok(Some(cached));
        }

        debug!(
            "Cache miss for key: {} ({} cached fields)",
            key,
            cached.fields.len()
        );

        let stored = self
            .inner
            .durable
            .find_by_key(key)
            .await
            .map_err(CacheError::DurableStore)?;

        let Some(mut record) = stored.filter(|r| !r.is_empty()) else {
            if cached.is_empty() {
                debug!("Record not found for key: {}", key);
                return Ok(None);
            }
            // Fields-only record that never reached the durable store
            self.inner
                .tracker
                .record_access(key, cached.estimated_size());
            return Ok(Some(cached));
        };
        record.fields.extend(cached.fields);

        // Warm the fast store before handing the record back
        if let Err(e) = self.write_fast(key, &record, config.default_ttl()).await {
            warn!(
                "Failed to warm fast store for key {}: {}. Returning durable copy.",
                key, e
            );
        } else {
            debug!("Warmed fast store from durable store for key: {}", key);
        }
        self.inner
            .tracker
            .record_access(key, record.estimated_size());

        Ok(Some(record))
    }

    /// Write a record to the fast store, then through to the durable store.
    ///
    /// A fast store failure fails the call and nothing is persisted. A durable
    /// store failure leaves the fast store write in place and is returned as
    /// [`CacheError::PartialFailure`]; the durable copy catches up on the next
    /// successful `set`. An empty record deletes the key.
    pub async fn set(&self, key: &str, record: Record, opts: SetOptions) -> CacheResult<()> {
        if record.is_empty() {
            debug!("Empty record for key {}, deleting instead", key);
            return self.delete(key).await;
        }

        let ttl = opts.ttl.or_else(|| self.inner.config.default_ttl());
        self.write_fast(key, &record, ttl)
            .await
            .map_err(CacheError::FastStore)?;
        self.inner
            .tracker
            .record_access(key, record.estimated_size());

        if !opts.persist {
            return Ok(());
        }

        if let Err(e) = self.inner.durable.upsert(key, record).await {
            warn!(
                "Durable write-through failed for key {}: {}. Fast store copy kept.",
                key, e
            );
            return Err(CacheError::PartialFailure {
                failed: StoreSide::Durable,
                source: e,
            });
        }
        Ok(())
    }

    /// Fetch selected fields of a record.
    ///
    /// Fields missing from the fast store are looked up in the durable copy
    /// and written back to the fast store. Ids that resolve nowhere are left
    /// out of the result.
    pub async fn get_fields(
        &self,
        key: &str,
        ids: &[FieldId],
    ) -> CacheResult<HashMap<FieldId, Vec<u8>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let fields_key = self.inner.config.fields_key(key);
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let cached = self
            .inner
            .fast
            .hash_get(&fields_key, &names)
            .await
            .map_err(CacheError::FastStore)?;

        let mut resolved = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for (id, name) in ids.iter().zip(names) {
            match cached.get(&name) {
                Some(value) => {
                    resolved.insert(id.clone(), value.clone());
                }
                None => missing.push((id, name)),
            }
        }

        if !missing.is_empty() {
            debug!(
                "{} of {} fields missed the fast store for key: {}",
                missing.len(),
                ids.len(),
                key
            );
            let stored = self
                .inner
                .durable
                .find_by_key(key)
                .await
                .map_err(CacheError::DurableStore)?;

            if let Some(record) = stored {
                let mut warm = HashMap::new();
                for (id, name) in missing {
                    if let Some(value) = record.fields.get(&name) {
                        resolved.insert(id.clone(), value.clone());
                        warm.insert(name, value.clone());
                    }
                }
                if !warm.is_empty()
                    && let Err(e) = self.inner.fast.hash_set(&fields_key, warm).await
                {
                    warn!("Failed to warm fields for key {}: {}", key, e);
                }
            }
        }

        if !resolved.is_empty() {
            self.inner.tracker.record_access(key, 0);
        }
        Ok(resolved)
    }

    /// Merge fields into a record. `None` deletes the field.
    ///
    /// The fast store merge is applied as one unit. With `mirror_fields`
    /// enabled the merge is then applied to the durable copy; a failure there
    /// is returned as [`CacheError::PartialFailure`].
    pub async fn set_fields(
        &self,
        key: &str,
        fields: HashMap<FieldId, Option<Vec<u8>>>,
    ) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut upserts = HashMap::new();
        let mut removals = Vec::new();
        for (id, value) in fields {
            match value {
                Some(value) => {
                    upserts.insert(id.to_string(), value);
                }
                None => removals.push(id.to_string()),
            }
        }

        let fields_key = self.inner.config.fields_key(key);
        self.inner
            .fast
            .hash_merge(&fields_key, upserts.clone(), removals.clone())
            .await
            .map_err(CacheError::FastStore)?;
        if !upserts.is_empty()
            && let Some(ttl) = self.inner.config.default_ttl()
        {
            self.inner
                .fast
                .expire(&fields_key, ttl)
                .await
                .map_err(CacheError::FastStore)?;
        }
        self.inner.tracker.record_access(key, 0);

        if !self.inner.config.mirror_fields {
            return Ok(());
        }

        if let Err(e) = self.mirror_fields(key, upserts, removals).await {
            warn!("Durable field merge failed for key {}: {}", key, e);
            return Err(CacheError::PartialFailure {
                failed: StoreSide::Durable,
                source: e,
            });
        }
        Ok(())
    }

    /// Delete a record from both stores.
    ///
    /// Both deletes are always attempted; the error names the side that failed.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let config = &self.inner.config;
        let fast_keys = [config.record_key(key), config.fields_key(key)];

        let (fast_result, durable_result) = futures::join!(
            self.inner.fast.delete(&fast_keys),
            self.inner.durable.delete_by_key(key)
        );

        if fast_result.is_ok() {
            self.inner.tracker.remove(key);
        }

        match (fast_result, durable_result) {
            (Ok(_), Ok(())) => {
                debug!("Deleted key {} from both stores", key);
                Ok(())
            }
            (Err(e), Ok(())) => {
                warn!("Fast store delete failed for key {}: {}", key, e);
                Err(CacheError::PartialFailure {
                    failed: StoreSide::Fast,
                    source: e,
                })
            }
            (Ok(_), Err(e)) => {
                warn!("Durable store delete failed for key {}: {}", key, e);
                Err(CacheError::PartialFailure {
                    failed: StoreSide::Durable,
                    source: e,
                })
            }
            (Err(fast), Err(durable)) => {
                warn!(
                    "Delete failed on both stores for key {}: fast: {}; durable: {}",
                    key, fast, durable
                );
                Err(CacheError::BothStores { fast, durable })
            }
        }
    }

    /// Clear a single key; same as [`HybridCache::delete`]
    pub async fn clear(&self, key: &str) -> CacheResult<()> {
        self.delete(key).await
    }

    /// Remove every record from the durable store.
    ///
    /// The fast store is left alone since it may hold unrelated data.
    pub async fn clear_all_durable(&self) -> CacheResult<()> {
        self.inner
            .durable
            .delete_all()
            .await
            .map_err(CacheError::DurableStore)?;
        debug!("Cleared all durable records");
        Ok(())
    }

    /// Replace the fast store copy of a record
    async fn write_fast(
        &self,
        key: &str,
        record: &Record,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let config = &self.inner.config;
        let fast = &self.inner.fast;
        let record_key = config.record_key(key);
        let fields_key = config.fields_key(key);

        match &record.primary {
            Some(primary) => fast.set(&record_key, primary.clone(), ttl).await?,
            None => {
                fast.delete(std::slice::from_ref(&record_key)).await?;
            }
        }

        let removals: Vec<String> = fast
            .hash_get_all(&fields_key)
            .await?
            .into_keys()
            .filter(|name| !record.fields.contains_key(name))
            .collect();
        fast.hash_merge(&fields_key, record.fields.clone(), removals)
            .await?;
        if !record.fields.is_empty()
            && let Some(ttl) = ttl
        {
            fast.expire(&fields_key, ttl).await?;
        }
        Ok(())
    }

    async fn mirror_fields(
        &self,
        key: &str,
        upserts: HashMap<String, Vec<u8>>,
        removals: Vec<String>,
    ) -> Result<(), StoreError> {
        let durable = &self.inner.durable;
        let mut record = durable.find_by_key(key).await?.unwrap_or_default();
        record.fields.extend(upserts);
        for name in &removals {
            record.fields.remove(name);
        }

        if record.is_empty() {
            durable.delete_by_key(key).await
        } else {
            durable.upsert(key, record).await
        }
    }
}
