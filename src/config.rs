//! Cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheError, CacheResult};

/// Headroom, in percentage points, that a memory-pressure sweep evicts below
/// the trigger threshold.
pub const EVICTION_HEADROOM_PERCENT: u8 = 10;

/// Configuration for the hybrid cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix applied to every record key in the fast store
    pub key_prefix: String,
    /// Suffix that turns a record key into its field-map key
    pub fields_suffix: String,
    /// Reserved fast store key holding the access tracker snapshot
    pub metadata_key: String,
    /// Expiry applied to `set` calls without an explicit ttl and to warm-ups
    pub default_ttl_secs: Option<u64>,
    /// Mirror `set_fields` merges into the durable store
    pub mirror_fields: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cache:record:".to_owned(),
            fields_suffix: ":fields".to_owned(),
            metadata_key: "cache:eviction:metadata".to_owned(),
            default_ttl_secs: None,
            mirror_fields: true,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.key_prefix.is_empty() {
            return Err(CacheError::Config("key_prefix must not be empty".to_owned()));
        }
        if self.fields_suffix.is_empty() {
            return Err(CacheError::Config(
                "fields_suffix must not be empty".to_owned(),
            ));
        }
        if self.metadata_key.is_empty() || self.metadata_key.starts_with(&self.key_prefix) {
            return Err(CacheError::Config(format!(
                "metadata_key '{}' must be non-empty and outside the record namespace '{}'",
                self.metadata_key, self.key_prefix
            )));
        }
        if self.default_ttl_secs == Some(0) {
            return Err(CacheError::Config(
                "default_ttl_secs must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Fast store key for a record's primary blob
    pub fn record_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Fast store key for a record's field map
    pub fn fields_key(&self, key: &str) -> String {
        format!("{}{}{}", self.key_prefix, key, self.fields_suffix)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

/// Configuration for the eviction manager, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Memory ceiling for the fast store
    pub max_fast_store_bytes: u64,
    /// Usage percentage above which LRU eviction starts
    pub eviction_threshold_percent: u8,
    /// Keys idle for longer than this are evicted regardless of pressure
    pub inactivity_timeout_secs: u64,
    /// Interval between sweeps
    pub check_interval_ms: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_fast_store_bytes: 1024 * 1024 * 1024, // 1 GiB
            eviction_threshold_percent: 80,
            inactivity_timeout_secs: 7 * 24 * 60 * 60, // 7 days
            check_interval_ms: 5 * 60 * 1000,          // 5 minutes
        }
    }
}

impl EvictionConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_fast_store_bytes == 0 {
            return Err(CacheError::Config(
                "max_fast_store_bytes must be greater than zero".to_owned(),
            ));
        }
        if self.eviction_threshold_percent == 0 || self.eviction_threshold_percent > 100 {
            return Err(CacheError::Config(format!(
                "eviction_threshold_percent must be within 1..=100, got {}",
                self.eviction_threshold_percent
            )));
        }
        if self.inactivity_timeout_secs == 0 {
            return Err(CacheError::Config(
                "inactivity_timeout_secs must be greater than zero".to_owned(),
            ));
        }
        if self.check_interval_ms == 0 {
            return Err(CacheError::Config(
                "check_interval_ms must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Usage percentage a pressure sweep evicts down to
    pub fn target_percent(&self) -> u8 {
        self.eviction_threshold_percent
            .saturating_sub(EVICTION_HEADROOM_PERCENT)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Reporting only; threshold decisions use the exact integer checks below
    pub fn percent_used(&self, used_bytes: u64) -> f64 {
        used_bytes as f64 / self.max_fast_store_bytes as f64 * 100.0
    }

    /// Usage strictly above the eviction threshold
    pub fn exceeds_threshold(&self, used_bytes: u64) -> bool {
        u128::from(used_bytes) * 100
            > u128::from(self.eviction_threshold_percent) * u128::from(self.max_fast_store_bytes)
    }

    /// Usage at or below `threshold - 10` percent
    pub fn within_target(&self, used_bytes: u64) -> bool {
        u128::from(used_bytes) * 100
            <= u128::from(self.target_percent()) * u128::from(self.max_fast_store_bytes)
    }
}
