//! Redis fast store adapter
//!
//! Uses a shared `ConnectionManager`, which reconnects on its own and is
//! cheap to clone per call. An optional per-command timeout is applied at
//! this boundary and surfaces as a retryable [`StoreError::Timeout`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FastStore, StoreError};

/// Configuration for the Redis adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Per-command timeout; `None` waits indefinitely
    pub command_timeout_ms: Option<u64>,
}

#[derive(Clone)]
pub struct RedisFastStore {
    conn: ConnectionManager,
    timeout: Option<Duration>,
}

impl RedisFastStore {
    pub async fn new(
        redis_client: redis::Client,
        config: RedisStoreConfig,
    ) -> Result<Self, redis::RedisError> {
        let conn = ConnectionManager::new(redis_client).await?;
        Ok(Self::from_manager(conn, config))
    }

    pub fn from_manager(conn: ConnectionManager, config: RedisStoreConfig) -> Self {
        Self {
            conn,
            timeout: config.command_timeout_ms.map(Duration::from_millis),
        }
    }

    async fn run<T, Fut>(&self, fut: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, redis::RedisError>>,
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(StoreError::Timeout(limit)),
            },
            None => Ok(fut.await?),
        }
    }
}

/// Extract `used_memory` from an `INFO memory` reply
pub(crate) fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}

#[async_trait]
impl FastStore for RedisFastStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.get::<_, Option<Vec<u8>>>(key)).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                self.run(conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)))
                    .await
            }
            None => self.run(conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.run(conn.del::<_, u64>(keys)).await
    }

    async fn hash_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        if fields.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key).arg(fields);
        let values: Vec<Option<Vec<u8>>> = self.run(cmd.query_async(&mut conn)).await?;

        Ok(fields
            .iter()
            .zip(values)
            .filter_map(|(field, value)| value.map(|v| (field.clone(), v)))
            .collect())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.hgetall::<_, HashMap<String, Vec<u8>>>(key))
            .await
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: HashMap<String, Vec<u8>>,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let items: Vec<(String, Vec<u8>)> = fields.into_iter().collect();
        let mut conn = self.conn.clone();
        self.run(conn.hset_multiple::<_, _, _, ()>(key, &items))
            .await
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.run(conn.hdel::<_, _, u64>(key, fields)).await
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

        // MULTI/EXEC so a merge is applied all-or-nothing
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !upserts.is_empty() {
            let items: Vec<(String, Vec<u8>)> = upserts.into_iter().collect();
            pipe.hset_multiple(key, &items).ignore();
        }
        if !removals.is_empty() {
            pipe.hdel(key, &removals).ignore();
        }

        let mut conn = self.conn.clone();
        self.run(pipe.query_async::<()>(&mut conn)).await?;
        debug!("Merged fields into Redis hash {}", key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1) as i64;
        self.run(conn.expire::<_, bool>(key, seconds)).await
    }

    async fn memory_info(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("INFO");
        cmd.arg("memory");
        let info: String = self.run(cmd.query_async(&mut conn)).await?;
        parse_used_memory(&info).ok_or_else(|| {
            StoreError::Backend("INFO memory reply has no used_memory field".into())
        })
    }
}
