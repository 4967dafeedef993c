//! Planner configuration
//!
//! Configuration is read from a [`SettingsProvider`] - a typed key-path
//! store of JSON values. The core never depends on how settings are
//! persisted; `SqliteDb` and [`MemorySettings`] are the two providers.

use crate::error::Result;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Settings Provider
// ============================================================================

/// Typed key-path settings store (`market.cache_ttl_hours`, ...)
pub trait SettingsProvider: Send + Sync {
    /// Raw value for a key, `None` when unset
    fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Store a raw value under a key
    fn set_value(&self, key: &str, value: Value) -> Result<()>;
}

impl dyn SettingsProvider + '_ {
    /// Typed lookup with a default for unset or malformed values
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get_value(key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Ignoring malformed setting '{}': {}", key, e);
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                tracing::warn!("Failed to read setting '{}': {}", key, e);
                default
            }
        }
    }

    /// Typed store
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_value(key, serde_json::to_value(value)?)
    }
}

/// In-memory settings provider
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsProvider for MemorySettings {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Retry policy for batched item-source fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Item ids per batch request
    pub batch_size: usize,
    /// Batches in flight at once
    pub concurrency: usize,
    /// Attempts per batch, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock budget for one batch including all retries
    pub batch_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            batch_size: 5,
            concurrency: 2,
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt` (1-based), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Size ceilings for the market cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
    /// Entries older than this are dropped first when a ceiling is breached
    pub recent_window: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 5000,
            max_bytes: 50 * 1024 * 1024,
            recent_window: Duration::from_secs(30 * 60),
        }
    }
}

/// Thresholds for acquisition-source defaulting of intermediate items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHeuristics {
    /// Recipes below this level with many ingredients default to buying
    pub low_level_threshold: u32,
    /// "Many" means strictly more ingredients than this
    pub many_ingredient_threshold: usize,
}

impl Default for SourceHeuristics {
    fn default() -> Self {
        Self {
            low_level_threshold: 10,
            many_ingredient_threshold: 3,
        }
    }
}

/// Complete planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub cache_ttl: Duration,
    pub warm_cache_for_crafted_items: bool,
    pub search_all_regions: bool,
    /// Every data center searched when `search_all_regions` is on
    pub all_regions: Vec<String>,
    pub home_world: Option<String>,
    /// Region groups fetched in parallel by the market cache
    pub region_concurrency: usize,
    pub listings_per_item: usize,
    pub heuristics: SourceHeuristics,
    pub max_depth: usize,
    pub retry: RetryPolicy,
    pub cache_limits: CacheLimits,
    /// Auto-refresh period, `None` when disabled
    pub auto_refresh_interval: Option<Duration>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3 * 3600),
            warm_cache_for_crafted_items: true,
            search_all_regions: false,
            all_regions: default_regions(),
            home_world: None,
            region_concurrency: 4,
            listings_per_item: 50,
            heuristics: SourceHeuristics::default(),
            max_depth: 20,
            retry: RetryPolicy::default(),
            cache_limits: CacheLimits::default(),
            auto_refresh_interval: None,
        }
    }
}

fn default_regions() -> Vec<String> {
    [
        "Aether", "Crystal", "Dynamis", "Primal", "Chaos", "Light", "Elemental", "Gaia", "Mana",
        "Meteor", "Materia",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl PlannerConfig {
    /// Load configuration, falling back to defaults for unset keys
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let d = Self::default();

        let ttl_hours: f64 = settings.get_or("market.cache_ttl_hours", 3.0);
        let auto_minutes: u64 = settings.get_or("refresh.auto_interval_minutes", 0);

        let config = Self {
            cache_ttl: Duration::from_secs_f64(ttl_hours.max(0.0) * 3600.0),
            warm_cache_for_crafted_items: settings
                .get_or("market.warm_cache_for_crafted_items", d.warm_cache_for_crafted_items),
            search_all_regions: settings.get_or("market.search_all_regions", d.search_all_regions),
            all_regions: settings.get_or("market.all_regions", d.all_regions),
            home_world: settings.get_or("market.home_world", d.home_world),
            region_concurrency: settings
                .get_or("market.region_concurrency", d.region_concurrency)
                .max(1),
            listings_per_item: settings.get_or("market.listings_per_item", d.listings_per_item),
            heuristics: SourceHeuristics {
                low_level_threshold: settings
                    .get_or("planning.low_level_threshold", d.heuristics.low_level_threshold),
                many_ingredient_threshold: settings.get_or(
                    "planning.many_ingredient_threshold",
                    d.heuristics.many_ingredient_threshold,
                ),
            },
            max_depth: settings.get_or("planning.max_depth", d.max_depth),
            retry: RetryPolicy {
                batch_size: settings.get_or("fetch.batch_size", d.retry.batch_size).max(1),
                concurrency: settings.get_or("fetch.concurrency", d.retry.concurrency).max(1),
                max_attempts: settings.get_or("fetch.max_attempts", d.retry.max_attempts).max(1),
                base_delay: Duration::from_millis(settings.get_or("fetch.base_delay_ms", 1000u64)),
                max_delay: Duration::from_millis(settings.get_or("fetch.max_delay_ms", 30_000u64)),
                batch_timeout: Duration::from_secs(settings.get_or("fetch.batch_timeout_secs", 120u64)),
            },
            cache_limits: CacheLimits {
                max_entries: settings.get_or("cache.max_entries", d.cache_limits.max_entries),
                max_bytes: settings.get_or("cache.max_bytes", d.cache_limits.max_bytes),
                recent_window: Duration::from_secs(
                    settings.get_or("cache.recent_window_minutes", 30u64) * 60,
                ),
            },
            auto_refresh_interval: (auto_minutes > 0).then(|| Duration::from_secs(auto_minutes * 60)),
        };

        tracing::debug!("Loaded planner configuration: {:?}", config);
        config
    }

    /// Persist every key read by [`PlannerConfig::from_settings`]
    pub fn save_to(&self, settings: &dyn SettingsProvider) -> Result<()> {
        settings.set("market.cache_ttl_hours", &(self.cache_ttl.as_secs_f64() / 3600.0))?;
        settings.set("market.warm_cache_for_crafted_items", &self.warm_cache_for_crafted_items)?;
        settings.set("market.search_all_regions", &self.search_all_regions)?;
        settings.set("market.all_regions", &self.all_regions)?;
        settings.set("market.home_world", &self.home_world)?;
        settings.set("market.region_concurrency", &self.region_concurrency)?;
        settings.set("market.listings_per_item", &self.listings_per_item)?;
        settings.set("planning.low_level_threshold", &self.heuristics.low_level_threshold)?;
        settings.set("planning.many_ingredient_threshold", &self.heuristics.many_ingredient_threshold)?;
        settings.set("planning.max_depth", &self.max_depth)?;
        settings.set("fetch.batch_size", &self.retry.batch_size)?;
        settings.set("fetch.concurrency", &self.retry.concurrency)?;
        settings.set("fetch.max_attempts", &self.retry.max_attempts)?;
        settings.set("fetch.base_delay_ms", &(self.retry.base_delay.as_millis() as u64))?;
        settings.set("fetch.max_delay_ms", &(self.retry.max_delay.as_millis() as u64))?;
        settings.set("fetch.batch_timeout_secs", &self.retry.batch_timeout.as_secs())?;
        settings.set("cache.max_entries", &self.cache_limits.max_entries)?;
        settings.set("cache.max_bytes", &self.cache_limits.max_bytes)?;
        settings.set(
            "cache.recent_window_minutes",
            &(self.cache_limits.recent_window.as_secs() / 60),
        )?;
        settings.set(
            "refresh.auto_interval_minutes",
            &self.auto_refresh_interval.map(|d| d.as_secs() / 60).unwrap_or(0),
        )?;
        Ok(())
    }
}
