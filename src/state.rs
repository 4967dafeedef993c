//! Application state management

use crate::cache::{Clock, MarketCache, MarketCacheStore, MemoryCacheStore, SystemClock};
use crate::config::{PlannerConfig, SettingsProvider};
use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::sources::garland::GarlandItemSource;
use crate::sources::universalis::UniversalisMarketSource;
use crate::sources::{ItemSource, MarketSource};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Application state shared across all services
pub struct AppState {
    /// SQLite database (plans, settings, persisted market cache)
    pub sqlite: Option<Arc<SqliteDb>>,

    /// Item/recipe database
    pub item_source: Arc<dyn ItemSource>,

    /// Marketboard API
    pub market_source: Arc<dyn MarketSource>,

    /// Market data cache
    pub market_cache: Arc<MarketCache>,

    /// Current configuration
    pub config: RwLock<PlannerConfig>,

    /// Application data directory
    pub data_dir: Option<PathBuf>,

    /// Held while a price refresh runs
    refresh_in_progress: AtomicBool,
}

impl AppState {
    /// Production state: SQLite under `data_dir` and the public APIs
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        tracing::info!("Data directory: {:?}", data_dir);

        let sqlite = Arc::new(SqliteDb::new(&data_dir.join("craft-planner.db"))?);
        let config = PlannerConfig::from_settings(sqlite.as_ref());

        let item_source: Arc<dyn ItemSource> = Arc::new(GarlandItemSource::new()?);
        let market_source: Arc<dyn MarketSource> =
            Arc::new(UniversalisMarketSource::new()?.with_listings_per_item(config.listings_per_item));

        let mut state = Self::with_parts(
            item_source,
            market_source,
            sqlite.clone(),
            Arc::new(SystemClock),
            config,
        );
        state.sqlite = Some(sqlite);
        state.data_dir = Some(data_dir.to_path_buf());
        Ok(state)
    }

    /// State without a database; market data lives in memory
    pub fn in_memory(
        item_source: Arc<dyn ItemSource>,
        market_source: Arc<dyn MarketSource>,
        config: PlannerConfig,
    ) -> Self {
        Self::with_parts(
            item_source,
            market_source,
            Arc::new(MemoryCacheStore::new()),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Assemble state from explicit collaborators
    pub fn with_parts(
        item_source: Arc<dyn ItemSource>,
        market_source: Arc<dyn MarketSource>,
        store: Arc<dyn MarketCacheStore>,
        clock: Arc<dyn Clock>,
        config: PlannerConfig,
    ) -> Self {
        let market_cache = MarketCache::new(store, market_source.clone(), clock)
            .with_limits(config.cache_limits.clone())
            .with_region_concurrency(config.region_concurrency);

        Self {
            sqlite: None,
            item_source,
            market_source,
            market_cache: Arc::new(market_cache),
            config: RwLock::new(config),
            data_dir: None,
            refresh_in_progress: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> PlannerConfig {
        self.config.read().clone()
    }

    /// Replace the configuration, persisting it when a database is attached.
    ///
    /// Cache limits and region concurrency take effect on the next start.
    pub fn update_config(&self, config: PlannerConfig) -> Result<()> {
        if let Some(db) = &self.sqlite {
            let settings: &dyn SettingsProvider = db.as_ref();
            config.save_to(settings)?;
        }
        *self.config.write() = config;
        tracing::info!("Configuration updated");
        Ok(())
    }

    /// Database handle, or an error for in-memory state
    pub fn db(&self) -> Result<&SqliteDb> {
        self.sqlite
            .as_deref()
            .ok_or_else(|| AppError::Config("No database attached".to_string()))
    }

    /// Claim the refresh slot; fails fast when a refresh is already running
    pub fn try_begin_refresh(&self) -> Result<RefreshGuard<'_>> {
        if self
            .refresh_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::RefreshInProgress);
        }
        Ok(RefreshGuard {
            flag: &self.refresh_in_progress,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_in_progress.load(Ordering::Acquire)
    }
}

/// Releases the refresh slot on drop
pub struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeItemSource, FakeMarketSource};

    fn state() -> AppState {
        AppState::in_memory(
            Arc::new(FakeItemSource::new()),
            Arc::new(FakeMarketSource::new()),
            PlannerConfig::default(),
        )
    }

    #[test]
    fn test_refresh_guard_is_exclusive() {
        let state = state();
        let guard = state.try_begin_refresh().unwrap();
        assert!(state.is_refreshing());
        assert!(matches!(state.try_begin_refresh(), Err(AppError::RefreshInProgress)));

        drop(guard);
        assert!(!state.is_refreshing());
        assert!(state.try_begin_refresh().is_ok());
    }

    #[test]
    fn test_in_memory_state_has_no_database() {
        let state = state();
        assert!(state.db().is_err());
        let mut config = state.config();
        config.home_world = Some("Gilgamesh".to_string());
        state.update_config(config).unwrap();
        assert_eq!(state.config().home_world.as_deref(), Some("Gilgamesh"));
    }

    #[test]
    fn test_new_opens_database_and_reads_settings() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(dir.path()).unwrap();
        assert!(state.db().is_ok());
        assert!(dir.path().join("craft-planner.db").exists());
    }
}
